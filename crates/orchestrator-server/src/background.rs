//! Spawns the background loops main.rs doesn't run inline: the Job Worker,
//! the Async Wait Coordinator's polling sweep, the Outbound Webhook
//! Deliverer, and the daily usage period-reset task. All four share one
//! `tokio::sync::watch` shutdown signal, the same pattern each loop already
//! uses individually in `orchestrator-core`.

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::config::Config;
use orchestrator_core::db::Store;
use orchestrator_core::orchestrator::Orchestrator;
use orchestrator_core::provider::registry::AdapterRegistry;
use orchestrator_core::wait_coordinator::AsyncWaitCoordinator;
use orchestrator_core::webhook::WebhookDeliverer;
use orchestrator_core::worker::JobWorker;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PERIOD_RESET_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl BackgroundTasks {
    pub fn spawn(
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        wait_coordinator: Arc<AsyncWaitCoordinator>,
        adapters: AdapterRegistry,
        config: Arc<Config>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Arc::new(JobWorker::new(store.clone(), orchestrator.clone(), adapters, &config));
        let deliverer = Arc::new(WebhookDeliverer::new(store.clone(), (*config).clone()));
        let handles = vec![
            tokio::spawn(worker.run(shutdown_rx.clone())),
            tokio::spawn(wait_coordinator.run(shutdown_rx.clone())),
            tokio::spawn(deliverer.run(shutdown_rx.clone())),
            tokio::spawn(run_period_reset(store, shutdown_rx)),
        ];

        Self { handles, shutdown_tx }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_period_reset(store: Arc<dyn Store>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("usage period-reset loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match store.reset_expired_free_plan_periods(chrono::Utc::now()).await {
            Ok(count) if count > 0 => tracing::info!(tenants_reset = count, "rolled forward expired free-plan periods"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "error resetting expired free-plan periods"),
        }

        tokio::select! {
            _ = tokio::time::sleep(PERIOD_RESET_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("usage period-reset loop shutting down");
}
