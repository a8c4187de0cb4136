//! Service lifecycle management.
//!
//! Wires the cluster, caches, classifier, queue and worker pool together and
//! runs them until a shutdown signal arrives.

use std::sync::Arc;

use orrery_core::{ReplicaGroup, Resource, Unit, Workload};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{Lister, ObjectCache};
use crate::classifier::EventClassifier;
use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::{ControllerError, ControllerResult};
use crate::informer::Informer;
use crate::queue::WorkQueue;
use crate::recorder::{EventRecorder, TracingRecorder};
use crate::store::{ClusterClient, ListWatch, MemoryCluster};
use crate::sync::SyncEngine;
use crate::watch::WatchEvent;

/// The controller service.
///
/// Manages the lifecycle of the reconciliation loop:
/// - Informers keeping the local caches current
/// - The event classifier feeding the work queue
/// - The worker pool draining it
/// - Signal handling and graceful shutdown
pub struct ControllerService {
    config: ControllerConfig,
    cluster: Arc<MemoryCluster>,
    recorder: Arc<dyn EventRecorder>,
    cancel: CancellationToken,
}

impl ControllerService {
    /// Create a service over an empty in-memory cluster.
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        let cluster = Arc::new(MemoryCluster::new(config.events.channel_capacity));
        Self::with_cluster(config, cluster, Arc::new(TracingRecorder))
    }

    /// Create a service over an existing cluster and event sink.
    #[must_use]
    pub fn with_cluster(
        config: ControllerConfig,
        cluster: Arc<MemoryCluster>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            config,
            cluster,
            recorder,
            cancel: CancellationToken::new(),
        }
    }

    /// The cluster this service reconciles.
    #[must_use]
    pub fn cluster(&self) -> &Arc<MemoryCluster> {
        &self.cluster
    }

    /// Run until shutdown is requested.
    ///
    /// This will:
    /// 1. Start an informer per object kind and wait for their caches to sync
    /// 2. Start classifying change notifications into workload keys
    /// 3. Start the worker pool
    /// 4. Wait for a shutdown signal, then drain in-flight syncs
    pub async fn run(&self) -> ControllerResult<()> {
        let workloads = Arc::new(ObjectCache::<Workload>::new());
        let groups = Arc::new(ObjectCache::<ReplicaGroup>::new());
        let units = Arc::new(ObjectCache::<Unit>::new());
        let queue = WorkQueue::new(&self.config.queue);

        let classifier = Arc::new(EventClassifier::new(
            Arc::clone(&workloads) as Arc<dyn Lister<Workload>>,
            Arc::clone(&groups) as Arc<dyn Lister<ReplicaGroup>>,
            Arc::clone(&units) as Arc<dyn Lister<Unit>>,
            queue.clone(),
        ));

        let mut tasks = JoinSet::new();
        self.spawn_informer(&mut tasks, &workloads, {
            let classifier = Arc::clone(&classifier);
            move |event: &WatchEvent<Workload>| classifier.on_workload(event)
        });
        self.spawn_informer(&mut tasks, &groups, {
            let classifier = Arc::clone(&classifier);
            move |event: &WatchEvent<ReplicaGroup>| classifier.on_replica_group(event)
        });
        self.spawn_informer(&mut tasks, &units, {
            let classifier = Arc::clone(&classifier);
            move |event: &WatchEvent<Unit>| classifier.on_unit(event)
        });

        let timeout = self.config.cache.sync_timeout();
        let synced = tokio::time::timeout(timeout, async {
            tokio::join!(
                workloads.wait_synced(),
                groups.wait_synced(),
                units.wait_synced()
            )
        })
        .await;
        if synced.is_err() {
            self.cancel.cancel();
            queue.shut_down();
            return Err(ControllerError::internal(format!(
                "caches did not sync within {}s",
                timeout.as_secs()
            )));
        }
        info!("caches synced");

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&self.cluster) as Arc<dyn ClusterClient>,
            workloads as Arc<dyn Lister<Workload>>,
            groups as Arc<dyn Lister<ReplicaGroup>>,
            units as Arc<dyn Lister<Unit>>,
            Arc::clone(&self.recorder),
            queue.clone(),
        ));
        let controller = Arc::new(Controller::new(engine, queue.clone(), &self.config.queue));
        let workers = tokio::spawn(controller.run(self.config.workers.count));

        info!(workers = self.config.workers.count, "controller running");
        shutdown_signal(self.cancel.clone()).await;

        queue.shut_down();
        self.cancel.cancel();
        if let Err(e) = workers.await {
            error!(error = %e, "worker pool failed");
        }
        while tasks.join_next().await.is_some() {}

        info!("controller shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawn an informer for `cache` and a task handing its events to
    /// `handle`.
    fn spawn_informer<T>(
        &self,
        tasks: &mut JoinSet<()>,
        cache: &Arc<ObjectCache<T>>,
        handle: impl Fn(&WatchEvent<T>) + Send + 'static,
    ) where
        T: Resource,
        MemoryCluster: ListWatch<T>,
    {
        let (tx, mut rx) = mpsc::channel(self.config.events.channel_capacity);
        let informer = Informer::new(
            Arc::clone(&self.cluster) as Arc<dyn ListWatch<T>>,
            Arc::clone(cache),
            tx,
        );
        tasks.spawn(informer.run(self.cancel.clone()));
        tasks.spawn(async move {
            while let Some(event) = rx.recv().await {
                handle(&event);
            }
        });
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_creation() {
        let service = ControllerService::new(ControllerConfig::default());
        assert!(!service.cancel.is_cancelled());
        assert_eq!(service.cluster().controller_writes(), 0);
    }

    #[test]
    fn service_shutdown() {
        let service = ControllerService::new(ControllerConfig::default());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let service = Arc::new(ControllerService::new(ControllerConfig::default()));
        let running = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await })
        };
        service.shutdown();
        running.await.expect("join").expect("clean shutdown");
    }
}
