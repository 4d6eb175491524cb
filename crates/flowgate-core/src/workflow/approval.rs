//! Approval coordination between a blocked run and an external resolver.
//!
//! Each outstanding ticket is a `oneshot` pair keyed by `(run_id, step_id)`.
//! `request_approval` creates the pair and forwards an [`ApprovalRequest`] to
//! the transport, which owns the expiry timer and the resolution endpoint.
//! `wait_for_approval` parks the run until the pair is fulfilled or the hard
//! ceiling elapses, then drops the key. `resolve` fulfils a pair at most once;
//! anything arriving after cleanup is logged and ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowgate_types::approval::{
    ApprovalKey, ApprovalRequest, ApprovalResolution, ApprovalResult, MAX_APPROVAL_MINUTES,
};

/// Placeholder replaced by the concrete link in delivery step inputs.
const APPROVAL_LINK_PLACEHOLDER: &str = "{{ context.approval_link }}";

/// Default hard ceiling on a single wait.
pub const DEFAULT_APPROVAL_CEILING: Duration = Duration::from_secs(MAX_APPROVAL_MINUTES * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("no approval registered for {0}")]
    NotRegistered(ApprovalKey),
}

struct PendingTicket {
    generation: u64,
    sender: Option<oneshot::Sender<ApprovalResult>>,
    receiver: Option<oneshot::Receiver<ApprovalResult>>,
}

/// Keyed registry of outstanding approval tickets.
pub struct ApprovalCoordinator {
    pending: DashMap<ApprovalKey, PendingTicket>,
    requests: mpsc::UnboundedSender<ApprovalRequest>,
    ceiling: Duration,
    generation: AtomicU64,
}

impl ApprovalCoordinator {
    /// Create a coordinator that forwards registrations on `requests`.
    pub fn new(requests: mpsc::UnboundedSender<ApprovalRequest>) -> Self {
        Self {
            pending: DashMap::new(),
            requests,
            ceiling: DEFAULT_APPROVAL_CEILING,
            generation: AtomicU64::new(0),
        }
    }

    /// Create a coordinator together with the receiving end of its request channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Override the hard wait ceiling.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Register a ticket and forward the registration to the transport.
    ///
    /// A duplicate request for the same key replaces the earlier ticket; a
    /// caller still waiting on the replaced ticket sees a timeout.
    pub fn request_approval(&self, mut request: ApprovalRequest) {
        let key = request.key();
        let (sender, receiver) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self.pending.insert(
            key.clone(),
            PendingTicket {
                generation,
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
        if replaced.is_some() {
            tracing::warn!(key = %key, "duplicate approval requested, overwriting ticket");
        }

        if let Some(delivery) = request.delivery_step.as_mut() {
            for value in delivery.input.values_mut() {
                if let Value::String(s) = value {
                    if s.contains(APPROVAL_LINK_PLACEHOLDER) {
                        *s = s.replace(APPROVAL_LINK_PLACEHOLDER, &request.approval_link);
                    }
                }
            }
        }

        tracing::info!(
            key = %key,
            link = %request.approval_link,
            timeout_minutes = request.timeout_minutes,
            "approval registered"
        );
        if self.requests.send(request).is_err() {
            tracing::warn!(key = %key, "approval transport unavailable, ticket can only time out");
        }
    }

    /// Block until the ticket is resolved or the ceiling elapses.
    ///
    /// Returns the stored result or [`ApprovalResult::Timeout`], and removes
    /// the key exactly once.
    pub async fn wait_for_approval(
        &self,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        let key = ApprovalKey::new(run_id, step_id);
        let (generation, receiver) = {
            let mut entry = self
                .pending
                .get_mut(&key)
                .ok_or_else(|| ApprovalError::NotRegistered(key.clone()))?;
            let receiver = entry
                .receiver
                .take()
                .ok_or_else(|| ApprovalError::NotRegistered(key.clone()))?;
            (entry.generation, receiver)
        };

        tracing::info!(key = %key, "blocking for approval");
        let result = match tokio::time::timeout(self.ceiling, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::debug!(key = %key, "approval ticket replaced while waiting");
                ApprovalResult::Timeout
            }
            Err(_) => ApprovalResult::Timeout,
        };

        self.pending.remove_if(&key, |_, ticket| ticket.generation == generation);
        tracing::info!(key = %key, result = ?result, "approval finished");
        Ok(result)
    }

    /// Fulfil the ticket for `(run_id, step_id)`. Returns whether a waiter was woken.
    pub fn resolve(&self, run_id: Uuid, step_id: &str, result: ApprovalResult) -> bool {
        let key = ApprovalKey::new(run_id, step_id);
        let sender = self
            .pending
            .get_mut(&key)
            .and_then(|mut ticket| ticket.sender.take());
        match sender {
            Some(sender) => {
                let delivered = sender.send(result).is_ok();
                tracing::info!(key = %key, delivered, "approval resolved");
                delivered
            }
            None => {
                tracing::warn!(key = %key, "no pending approval for resolution, ignoring");
                false
            }
        }
    }

    /// Whether a ticket for the key is still outstanding.
    pub fn is_pending(&self, run_id: Uuid, step_id: &str) -> bool {
        self.pending.contains_key(&ApprovalKey::new(run_id, step_id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Consume resolution events on a single task, preserving per-key order.
    pub fn spawn_result_listener(
        self: Arc<Self>,
        mut results: mpsc::UnboundedReceiver<ApprovalResolution>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(resolution) = results.recv().await {
                self.resolve(resolution.run_id, &resolution.step_id, resolution.result);
            }
            tracing::debug!("approval result channel closed, listener exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::workflow::StepDefinition;
    use serde_json::json;

    fn request(run_id: Uuid, step_id: &str) -> ApprovalRequest {
        ApprovalRequest {
            run_id,
            step_id: step_id.to_string(),
            timeout_minutes: 30,
            message: "approve?".into(),
            approval_link: format!("http://localhost:5000/api/approve/{run_id}/{step_id}"),
            delivery_step: None,
            context_snapshot: Default::default(),
        }
    }

    #[tokio::test]
    async fn resolve_unblocks_waiter() {
        let (coordinator, mut requests) = ApprovalCoordinator::channel();
        let coordinator = Arc::new(coordinator);
        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "sign-off"));

        let forwarded = requests.recv().await.unwrap();
        assert_eq!(forwarded.step_id, "sign-off");

        let waiter = {
            let c = Arc::clone(&coordinator);
            tokio::spawn(async move { c.wait_for_approval(run_id, "sign-off").await })
        };
        tokio::task::yield_now().await;
        assert!(coordinator.resolve(run_id, "sign-off", ApprovalResult::Approved));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.to_value(), json!({"status": "approved"}));
        assert!(!coordinator.is_pending(run_id, "sign-off"));
    }

    #[tokio::test]
    async fn resolve_before_wait_is_kept() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "s"));
        assert!(coordinator.resolve(run_id, "s", ApprovalResult::Approved));
        assert_eq!(
            coordinator.wait_for_approval(run_id, "s").await.unwrap(),
            ApprovalResult::Approved
        );
    }

    #[tokio::test]
    async fn resolving_unknown_key_is_a_no_op() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        assert!(!coordinator.resolve(Uuid::now_v7(), "nope", ApprovalResult::Approved));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_yields_timeout_and_clears_key() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        let coordinator = coordinator.with_ceiling(Duration::from_secs(60));
        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "s"));

        let result = coordinator.wait_for_approval(run_id, "s").await.unwrap();
        assert_eq!(result, ApprovalResult::Timeout);
        assert!(!coordinator.is_pending(run_id, "s"));
        // Late resolution after cleanup does nothing.
        assert!(!coordinator.resolve(run_id, "s", ApprovalResult::Approved));
    }

    #[tokio::test]
    async fn resolves_at_most_once() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "s"));
        assert!(coordinator.resolve(run_id, "s", ApprovalResult::Approved));
        assert!(!coordinator.resolve(run_id, "s", ApprovalResult::Timeout));
        assert_eq!(
            coordinator.wait_for_approval(run_id, "s").await.unwrap(),
            ApprovalResult::Approved
        );
    }

    #[tokio::test]
    async fn waiting_without_request_errors() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        let err = coordinator.wait_for_approval(Uuid::now_v7(), "x").await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn duplicate_request_overwrites() {
        let (coordinator, mut requests) = ApprovalCoordinator::channel();
        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "s"));
        coordinator.request_approval(request(run_id, "s"));
        assert_eq!(coordinator.pending_count(), 1);
        assert!(requests.recv().await.is_some());
        assert!(requests.recv().await.is_some());
    }

    #[tokio::test]
    async fn delivery_input_gets_concrete_link() {
        let (coordinator, mut requests) = ApprovalCoordinator::channel();
        let run_id = Uuid::now_v7();
        let mut req = request(run_id, "s");
        let delivery: StepDefinition = serde_json::from_value(json!({
            "id": "mail",
            "type": "action",
            "action": "logger.Logger.info",
            "input": {"message": "Please review: {{ context.approval_link }}"}
        }))
        .unwrap();
        req.delivery_step = Some(delivery);
        coordinator.request_approval(req);

        let forwarded = requests.recv().await.unwrap();
        let message = &forwarded.delivery_step.unwrap().input["message"];
        assert_eq!(
            message,
            &json!(format!("Please review: http://localhost:5000/api/approve/{run_id}/s"))
        );
    }

    #[tokio::test]
    async fn listener_applies_resolutions() {
        let (coordinator, _requests) = ApprovalCoordinator::channel();
        let coordinator = Arc::new(coordinator);
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::clone(&coordinator).spawn_result_listener(rx);

        let run_id = Uuid::now_v7();
        coordinator.request_approval(request(run_id, "form"));
        tx.send(ApprovalResolution {
            run_id,
            step_id: "form".into(),
            result: ApprovalResult::Submitted {
                form_data: json!({"size": "large"}),
            },
        })
        .unwrap();

        let result = coordinator.wait_for_approval(run_id, "form").await.unwrap();
        assert_eq!(result.form_data(), json!({"size": "large"}));

        drop(tx);
        listener.await.unwrap();
    }
}
