use std::sync::Arc;

use anyhow::Result;
use shiftmirror_core::clock::SystemClock;
use shiftmirror_core::config::MirrorConfig;
use shiftmirror_core::fetch::HttpFetcher;
use shiftmirror_core::notify::BroadcastNotifier;
use shiftmirror_core::reconcile::{ReconcileSettings, Reconciler};
use shiftmirror_core::scheduler::Scheduler;
use shiftmirror_core::store::{JsonStore, MirrorStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Scheduler,
    pub notifier: Arc<BroadcastNotifier>,
}

impl AppState {
    pub async fn from_config(config: &MirrorConfig) -> Result<Self> {
        let store_path = config.store_path();
        let store = Arc::new(JsonStore::open(&store_path).await?);
        tracing::info!(path = %store_path.display(), "Store opened");

        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        let notifier = Arc::new(BroadcastNotifier::new(64));

        let reconciler = Arc::new(Reconciler::new(
            store,
            fetcher,
            notifier.clone(),
            Arc::new(SystemClock),
            ReconcileSettings::from_config(config)?,
        ));
        let scheduler = Scheduler::new(reconciler.clone(), config.reload_interval);

        Ok(AppState {
            reconciler,
            scheduler,
            notifier,
        })
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        self.reconciler.store()
    }
}
