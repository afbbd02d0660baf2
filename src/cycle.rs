use crate::compare::compare;
use crate::config::AppConfig;
use crate::error::Result;
use crate::fetch::ReadingSource;
use crate::ingest::Ingestor;
use crate::storage::HistoryStore;
use crate::structs::{CycleReport, Statistics, or_unknown};
use log::{debug, error, info, warn};

/// Runs refresh cycles: fetch, persist, recompute statistics and comparisons.
///
/// The tracker owns the history store; callers serialize cycles by awaiting
/// each [`Tracker::run_cycle`] before triggering the next. Scheduling (timer,
/// keypress) is left to the caller.
pub struct Tracker<S: ReadingSource> {
    config: AppConfig,
    store: HistoryStore,
    ingestor: Ingestor,
    source: S,
}

impl<S: ReadingSource> Tracker<S> {
    /// Builds a tracker. If the history file cannot be created the tracker
    /// still starts and treats history as empty.
    pub fn new(config: AppConfig, source: S) -> Self {
        let store = match HistoryStore::open(&config.data_file, config.history_capacity) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Could not prepare history file {}: {}",
                    config.data_file.display(),
                    e
                );
                HistoryStore::new(&config.data_file, config.history_capacity)
            }
        };
        let ingestor = Ingestor::new(&config);

        Self {
            config,
            store,
            ingestor,
            source,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.store
    }

    /// Runs one full refresh cycle.
    ///
    /// # Errors
    /// Returns the source's error when it is not ready or the fetch fails; in
    /// that case nothing is persisted. A failure to persist the new reading
    /// is logged and the cycle continues.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.source.ensure_ready()?;

        debug!("Cycle started ({})", self.source.source_name());
        let current = self.source.fetch_current().await?;
        info!(
            "Fetched {}: {}°F, {}",
            current.city,
            or_unknown(current.temperature),
            or_unknown(current.description.as_deref())
        );

        if let Err(e) = self.store.append(&current) {
            error!("Failed to save reading: {}", e);
        }

        let recent = self.store.recent(self.config.recent_days);
        let statistics = Statistics::from_history(&recent, current.temperature);
        let comparisons = compare(Some(&current), self.ingestor.ingest_all());
        debug!(
            "Cycle finished: {} readings in window, {} comparisons",
            statistics.readings,
            comparisons.len()
        );

        Ok(CycleReport {
            current,
            statistics,
            comparisons,
        })
    }

    /// Statistics over stored history alone, without fetching.
    pub fn snapshot(&self) -> Statistics {
        let recent = self.store.recent(self.config.recent_days);
        Statistics::from_history(&recent, None)
    }
}
