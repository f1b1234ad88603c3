//! Acctest Plugin
//!
//! Runs provider servers inside the test process so the CLI can reattach to
//! them instead of launching provider binaries itself.

pub mod factory;
pub mod launcher;
pub mod server;

use acctest_core::BoxError;

pub use factory::{Protocol, ProviderFactories, ProviderFactory};
pub use launcher::{RunningProviders, launch};
pub use server::{ProviderServer, Shutdown};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(
        "Provider {name} registered in both {first} and {second} provider factories: please use one or the other, or supply a muxed provider"
    )]
    Overlap {
        name: String,
        first: Protocol,
        second: Protocol,
    },

    #[error("unable to create provider \"{name}\" from factory: {source}")]
    Factory { name: String, source: BoxError },

    #[error("failed to listen for provider {name}: {source}")]
    Listen {
        name: String,
        source: std::io::Error,
    },

    #[error("provider server error: {0}")]
    Server(String),

    #[error("provider {name} server task failed: {source}")]
    Task {
        name: String,
        source: tokio::task::JoinError,
    },

    #[error("{label} failed: {source}")]
    Stop { label: String, source: BoxError },
}
