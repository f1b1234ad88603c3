//! Starts provider servers and collects their reattach records

use std::net::Ipv4Addr;
use std::sync::Arc;

use acctest_core::BoxError;
use acctest_core::env::AccConfig;
use acctest_core::reattach::{ReattachConfig, ReattachInfo};
use acctest_core::teardown::Teardown;
use log::{debug, error, trace, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::PluginError;
use crate::factory::{ProviderFactories, ProviderFactory};
use crate::server::Shutdown;

/// Provider servers started for one CLI command
pub struct RunningProviders {
    reattach_info: ReattachInfo,
    tasks: Vec<(String, JoinHandle<Result<(), PluginError>>)>,
    cancel: watch::Sender<bool>,
    teardown: Teardown<()>,
}

/// Start a server for every factory and return their reattach records
///
/// If any provider fails to start, the ones already running are shut down
/// before the error is returned.
pub async fn launch(
    factories: &ProviderFactories,
    config: &AccConfig,
) -> Result<RunningProviders, PluginError> {
    factories.check_overlap()?;

    let (cancel, _) = watch::channel(false);
    let mut running = RunningProviders {
        reattach_info: ReattachInfo::new(),
        tasks: Vec::new(),
        cancel,
        teardown: Teardown::new(),
    };

    for (name, factory) in factories.iter() {
        if let Err(e) = running.start(name, factory, config).await {
            error!("Failed to start provider {}: {}", name, e);
            for failure in running.shutdown().await {
                warn!("{}", failure);
            }
            return Err(e);
        }
    }

    Ok(running)
}

impl RunningProviders {
    async fn start(
        &mut self,
        name: &str,
        factory: &ProviderFactory,
        config: &AccConfig,
    ) -> Result<(), PluginError> {
        let server = factory
            .construct()
            .map_err(|source| PluginError::Factory {
                name: name.to_string(),
                source,
            })?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|source| PluginError::Listen {
                name: name.to_string(),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| PluginError::Listen {
                name: name.to_string(),
                source,
            })?;

        let shutdown = Shutdown::new(self.cancel.subscribe());
        let task_server = Arc::clone(&server);
        let handle = tokio::spawn(async move { task_server.serve(listener, shutdown).await });
        self.tasks.push((name.to_string(), handle));

        if factory.is_legacy() {
            self.teardown
                .push(format!("stop provider {}", name), move |_| {
                    Box::pin(async move { server.stop().await.map_err(|e| Box::new(e) as BoxError) })
                });
        }

        let reattach = ReattachConfig::tcp(addr, factory.protocol_version());
        for address in config.reattach_addresses(name) {
            trace!("Reattach {} -> {}", address, addr);
            self.reattach_info.insert(address, reattach.clone());
        }
        debug!(
            "Started provider {} ({}) on {}",
            name,
            factory.protocol(),
            addr
        );
        Ok(())
    }

    pub fn reattach_info(&self) -> &ReattachInfo {
        &self.reattach_info
    }

    /// Number of servers started
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every server, stop legacy providers, then wait for all of them to finish
    ///
    /// Legacy servers keep serving until `stop` is called, so the stops run
    /// before the task barrier.
    pub async fn shutdown(self) -> Vec<PluginError> {
        let RunningProviders {
            tasks,
            cancel,
            teardown,
            ..
        } = self;

        cancel.send_replace(true);

        let mut errors = Vec::new();
        for failure in teardown.run(&mut ()).await {
            errors.push(PluginError::Stop {
                label: failure.label,
                source: failure.error,
            });
        }

        for (name, handle) in tasks {
            match handle.await {
                Ok(Ok(())) => trace!("Provider {} stopped serving", name),
                Ok(Err(e)) => {
                    warn!("Provider {} exited with error: {}", name, e);
                    errors.push(e);
                }
                Err(source) => errors.push(PluginError::Task { name, source }),
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ProviderServer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::Notify;

    /// Accepts connections until shut down and counts them
    struct FakeServer {
        accepted: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderServer for FakeServer {
        async fn serve(&self, listener: TcpListener, mut shutdown: Shutdown) -> Result<(), PluginError> {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => return Ok(()),
                    accepted = listener.accept() => {
                        accepted.map_err(|e| PluginError::Server(e.to_string()))?;
                        self.accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }

        async fn stop(&self) -> Result<(), PluginError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Counters {
        accepted: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl Counters {
        fn new() -> Self {
            Self {
                accepted: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn factory(&self) -> impl Fn() -> Result<Arc<dyn ProviderServer>, BoxError> + Send + Sync + 'static {
            let accepted = Arc::clone(&self.accepted);
            let stops = Arc::clone(&self.stops);
            move || {
                Ok(Arc::new(FakeServer {
                    accepted: Arc::clone(&accepted),
                    stops: Arc::clone(&stops),
                }) as Arc<dyn ProviderServer>)
            }
        }
    }

    #[tokio::test]
    async fn launches_and_registers_every_namespace() {
        let legacy = Counters::new();
        let v6 = Counters::new();
        let factories = ProviderFactories::new()
            .legacy("terraform-provider-example", legacy.factory())
            .proto_v6("random", v6.factory());

        let running = launch(&factories, &AccConfig::default()).await.unwrap();
        assert_eq!(running.len(), 2);

        let info = running.reattach_info();
        assert_eq!(info.len(), 4);
        let example = info.get("registry.terraform.io/hashicorp/example").unwrap();
        assert_eq!(example.protocol_version, 5);
        assert_eq!(example.addr.network, "tcp");
        let random = info.get("registry.terraform.io/-/random").unwrap();
        assert_eq!(random.protocol_version, 6);

        let mut stream = TcpStream::connect(&random.addr.string).await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let errors = running.shutdown().await;
        assert!(errors.is_empty());
        assert_eq!(legacy.stops.load(Ordering::SeqCst), 1);
        assert_eq!(v6.stops.load(Ordering::SeqCst), 0);
    }

    /// Ignores cancellation and only returns once stopped
    struct StopOnly {
        stopped: Arc<Notify>,
    }

    #[async_trait]
    impl ProviderServer for StopOnly {
        async fn serve(&self, listener: TcpListener, _shutdown: Shutdown) -> Result<(), PluginError> {
            let _listener = listener;
            self.stopped.notified().await;
            Ok(())
        }

        async fn stop(&self) -> Result<(), PluginError> {
            self.stopped.notify_one();
            Ok(())
        }
    }

    #[tokio::test]
    async fn legacy_servers_are_stopped_before_waiting_on_them() {
        let factories = ProviderFactories::new().legacy("example", || {
            Ok(Arc::new(StopOnly {
                stopped: Arc::new(Notify::new()),
            }) as Arc<dyn ProviderServer>)
        });

        let running = launch(&factories, &AccConfig::default()).await.unwrap();
        let errors = tokio::time::timeout(Duration::from_secs(5), running.shutdown())
            .await
            .expect("shutdown waited on a legacy server before stopping it");
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn factory_error_shuts_down_started_servers() {
        let legacy = Counters::new();
        let factories = ProviderFactories::new()
            .legacy("example", legacy.factory())
            .proto_v5("broken", || Err("no credentials".into()));

        let err = launch(&factories, &AccConfig::default())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "unable to create provider \"broken\" from factory: no credentials"
        );
        assert_eq!(legacy.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlap_fails_before_any_constructor_runs() {
        let factories = ProviderFactories::new()
            .proto_v5("example", || panic!("constructor must not run"))
            .proto_v6("example", || panic!("constructor must not run"));

        let err = launch(&factories, &AccConfig::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("registered in both"));
    }
}
