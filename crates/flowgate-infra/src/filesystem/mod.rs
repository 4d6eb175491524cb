//! Filesystem adapters for Flowgate.

pub mod lifetime;

pub use lifetime::YamlLifetimeRepository;
