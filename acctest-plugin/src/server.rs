//! Provider server trait

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::PluginError;

/// Cancellation signal handed to a running server
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(rx)
    }

    pub fn is_signalled(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until shutdown is requested or the launcher goes away
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

/// A provider implementation that can serve the plugin protocol
///
/// The protocol itself is out of scope here: implementations own everything
/// that happens on the accepted connections.
#[async_trait]
pub trait ProviderServer: Send + Sync {
    /// Serve connections from `listener` until `shutdown` fires
    async fn serve(&self, listener: TcpListener, shutdown: Shutdown) -> Result<(), PluginError>;

    /// Ask the provider to abandon in-flight work
    async fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
