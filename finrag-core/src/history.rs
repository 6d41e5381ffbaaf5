//! Durable, change-aware, size-bounded history of aggregate snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MetricsError;
use crate::metrics::AggregateMetrics;
use crate::persistence::JsonFile;
use crate::report;

/// File name inside the metrics storage directory.
pub const METRICS_FILE: &str = "metrics.json";

/// One history entry: the aggregate as it was at `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub aggregate: AggregateMetrics,
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsState {
    pub metrics_history: Vec<MetricsHistoryEntry>,
    pub aggregate_metrics: AggregateMetrics,
}

/// Durable storage for [`MetricsState`].
pub trait MetricsPersistence: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<MetricsState>, MetricsError>;
    fn save(&self, state: &MetricsState) -> Result<(), MetricsError>;
}

/// Stores the state as pretty JSON in `<storage_dir>/metrics.json`.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    file: JsonFile,
}

impl JsonFilePersistence {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(storage_dir.into().join(METRICS_FILE)),
        }
    }
}

impl MetricsPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<MetricsState>, MetricsError> {
        self.file.load().map_err(|e| MetricsError::LoadFailed {
            path: self.file.path().to_path_buf(),
            message: e.to_string(),
        })
    }

    fn save(&self, state: &MetricsState) -> Result<(), MetricsError> {
        self.file.save(state).map_err(|e| MetricsError::SaveFailed {
            path: self.file.path().to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Configuration for metrics storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Maximum history entries kept; oldest are dropped first.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Overwrite the stored state with an empty one when the store opens.
    #[serde(default)]
    pub reset_on_start: bool,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data/metrics")
}

fn default_history_capacity() -> usize {
    100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            history_capacity: default_history_capacity(),
            reset_on_start: false,
        }
    }
}

pub struct MetricsHistoryStore {
    persistence: Box<dyn MetricsPersistence>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl MetricsHistoryStore {
    pub fn new(persistence: Box<dyn MetricsPersistence>, capacity: usize) -> Self {
        Self {
            persistence,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a JSON-file store per `config`, resetting it if requested.
    pub fn open(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let store = Self::new(
            Box::new(JsonFilePersistence::new(&config.storage_dir)),
            config.history_capacity,
        );
        if config.reset_on_start {
            store.reset()?;
        }
        Ok(store)
    }

    /// Record `aggregate` if it differs from the stored one.
    ///
    /// Appends a timestamped entry when the history is empty or the stored
    /// aggregate differs, trims the history to capacity, replaces the stored
    /// aggregate and saves. Returns whether anything was written.
    pub fn update(&self, aggregate: &AggregateMetrics) -> Result<bool, MetricsError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut state = self.load_or_fresh();
        if !state.metrics_history.is_empty() && state.aggregate_metrics == *aggregate {
            debug!("No change in aggregate metrics, skipping history update");
            return Ok(false);
        }

        state.metrics_history.push(MetricsHistoryEntry {
            timestamp: Utc::now(),
            aggregate: aggregate.clone(),
        });
        if state.metrics_history.len() > self.capacity {
            let excess = state.metrics_history.len() - self.capacity;
            state.metrics_history.drain(..excess);
        }
        state.aggregate_metrics = aggregate.clone();
        self.persistence.save(&state)?;

        info!(
            history_len = state.metrics_history.len(),
            total_questions = aggregate.total_questions,
            "Metrics updated\n{}",
            report::render(aggregate)
        );
        Ok(true)
    }

    /// The stored aggregate and history (empty when nothing is stored).
    pub fn state(&self) -> Result<MetricsState, MetricsError> {
        Ok(self.persistence.load()?.unwrap_or_default())
    }

    /// Replace the stored state with an empty history and zeroed aggregate.
    pub fn reset(&self) -> Result<(), MetricsError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.persistence.save(&MetricsState::default())?;
        info!("Metrics history reset");
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// An unreadable file is logged and treated as empty; the next save
    /// replaces it.
    fn load_or_fresh(&self) -> MetricsState {
        match self.persistence.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Could not load stored metrics, starting fresh");
                MetricsState::default()
            }
        }
    }
}
