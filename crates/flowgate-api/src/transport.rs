//! Approval transport: the real-world side of the approval handshake.
//!
//! Consumes registrations from the coordinator, keeps one route per
//! (run_id, step_id) with an expiry timer, and pushes resolutions (link
//! clicks, form submissions, timeouts) onto the result channel the
//! coordinator's listener drains.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use flowgate_types::approval::{
    ApprovalKey, ApprovalRequest, ApprovalResolution, ApprovalResult, MAX_APPROVAL_MINUTES,
};

struct Route {
    generation: u64,
    expires_at: DateTime<Utc>,
    timer: AbortHandle,
}

/// A live approval route as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRoute {
    pub workflow_uid: Uuid,
    pub step_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct ApprovalTransport {
    routes: Arc<DashMap<ApprovalKey, Route>>,
    results: mpsc::UnboundedSender<ApprovalResolution>,
    generations: AtomicU64,
}

impl ApprovalTransport {
    pub fn new(results: mpsc::UnboundedSender<ApprovalResolution>) -> Self {
        Self {
            routes: Arc::new(DashMap::new()),
            results,
            generations: AtomicU64::new(0),
        }
    }

    /// Consume registrations until the coordinator side closes.
    pub fn spawn(self: Arc<Self>, mut requests: mpsc::UnboundedReceiver<ApprovalRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                self.register(&request);
            }
            tracing::debug!("approval registration channel closed");
        })
    }

    /// Open a route for `request` and arm its expiry timer. A route already
    /// open for the same key is replaced.
    pub fn register(&self, request: &ApprovalRequest) {
        let key = request.key();
        let minutes = request.timeout_minutes.min(MAX_APPROVAL_MINUTES);
        let ttl = Duration::from_secs(minutes * 60);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let routes = Arc::clone(&self.routes);
        let results = self.results.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if routes
                .remove_if(&timer_key, |_, route| route.generation == generation)
                .is_some()
            {
                tracing::info!(run_id = %timer_key.run_id, step_id = %timer_key.step_id, "approval route expired");
                let _ = results.send(ApprovalResolution {
                    run_id: timer_key.run_id,
                    step_id: timer_key.step_id,
                    result: ApprovalResult::Timeout,
                });
            }
        });

        let expires_at = Utc::now() + chrono::Duration::minutes(minutes as i64);
        let route = Route {
            generation,
            expires_at,
            timer: timer.abort_handle(),
        };
        if let Some(previous) = self.routes.insert(key.clone(), route) {
            previous.timer.abort();
            tracing::warn!(run_id = %key.run_id, step_id = %key.step_id, "approval route replaced");
        }
        tracing::info!(
            run_id = %key.run_id,
            step_id = %key.step_id,
            timeout_minutes = minutes,
            link = %request.approval_link,
            "approval route registered"
        );
    }

    /// Close the route and push `result`. False for unknown or expired routes.
    pub fn resolve(&self, run_id: Uuid, step_id: &str, result: ApprovalResult) -> bool {
        let key = ApprovalKey::new(run_id, step_id);
        let Some((_, route)) = self.routes.remove(&key) else {
            tracing::warn!(%run_id, %step_id, "no approval route");
            return false;
        };
        route.timer.abort();
        if self
            .results
            .send(ApprovalResolution {
                run_id,
                step_id: step_id.to_string(),
                result,
            })
            .is_err()
        {
            tracing::error!(%run_id, %step_id, "approval result channel closed");
            return false;
        }
        true
    }

    pub fn is_open(&self, run_id: Uuid, step_id: &str) -> bool {
        self.routes.contains_key(&ApprovalKey::new(run_id, step_id))
    }

    /// Open routes, oldest expiry first.
    pub fn pending(&self) -> Vec<PendingRoute> {
        let mut pending: Vec<PendingRoute> = self
            .routes
            .iter()
            .map(|entry| PendingRoute {
                workflow_uid: entry.key().run_id,
                step_id: entry.key().step_id.clone(),
                expires_at: entry.value().expires_at,
            })
            .collect();
        pending.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        pending
    }
}
