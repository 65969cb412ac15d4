//! Shared daemon state: config, refresh lifecycle, and the rolling refresh
//! history persisted under `~/.shipdeck/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU32;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::cache::MetricsCache;
use crate::fulfillment::Sources;
use crate::types::{Config, RefreshRecord, RefreshState, RefreshTrigger};

/// Maximum number of refresh records to keep in memory and on disk
const MAX_REFRESH_HISTORY: usize = 50;

const HISTORY_FILE: &str = "refresh_history.json";
const CONFIG_FILE: &str = "config.json";

/// Lifecycle of the historical rate backfill. At most one pass per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillPhase {
    #[default]
    Idle,
    Running,
    Completed,
}

/// Tracks whether the backfill pass has started or finished, replacing any
/// notion of a process-global flag. Held behind the state mutex so a second
/// spawn attempt can see an in-flight pass.
#[derive(Debug, Clone, Default)]
pub struct BackfillGuard {
    pub phase: BackfillPhase,
    pub finished_at: Option<DateTime<Utc>>,
    pub days_filled: u32,
}

/// Shared application state for the daemon and its background tasks.
pub struct AppState {
    pub config: Mutex<Option<Config>>,
    pub refresh_state: Mutex<RefreshState>,
    pub refresh_history: Mutex<Vec<RefreshRecord>>,
    pub backfill: Mutex<BackfillGuard>,
    pub cache: MetricsCache,
    pub sources: Sources,
    /// Directory holding config and history, usually `~/.shipdeck`.
    pub data_dir: PathBuf,
    /// Full recomputes performed since launch.
    pub recomputations: AtomicU32,
}

impl AppState {
    pub fn new(
        config: Option<Config>,
        cache: MetricsCache,
        sources: Sources,
        data_dir: PathBuf,
    ) -> Self {
        let history = load_refresh_history(&data_dir).unwrap_or_default();

        Self {
            config: Mutex::new(config),
            refresh_state: Mutex::new(RefreshState::NoCache),
            refresh_history: Mutex::new(history),
            backfill: Mutex::new(BackfillGuard::default()),
            cache,
            sources,
            data_dir,
            recomputations: AtomicU32::new(0),
        }
    }

    /// Clone of the current config, falling back to defaults when none is loaded.
    pub fn config_snapshot(&self) -> Config {
        self.config
            .lock()
            .map(|guard| guard.clone().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.refresh_state
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default()
    }

    pub fn set_refresh_state(&self, state: RefreshState) {
        if let Ok(mut guard) = self.refresh_state.lock() {
            *guard = state;
        }
    }

    /// Claim the backfill slot. Returns false if a pass already ran or is
    /// running, so callers skip instead of stacking passes.
    pub fn begin_backfill(&self) -> bool {
        match self.backfill.lock() {
            Ok(mut guard) if guard.phase == BackfillPhase::Idle => {
                guard.phase = BackfillPhase::Running;
                true
            }
            _ => false,
        }
    }

    pub fn finish_backfill(&self, days_filled: u32) {
        if let Ok(mut guard) = self.backfill.lock() {
            guard.phase = BackfillPhase::Completed;
            guard.finished_at = Some(Utc::now());
            guard.days_filled = days_filled;
        }
    }

    pub fn backfill_phase(&self) -> BackfillPhase {
        self.backfill
            .lock()
            .map(|guard| guard.phase)
            .unwrap_or_default()
    }

    /// Add a refresh record to history, newest first
    pub fn add_refresh_record(&self, record: RefreshRecord) {
        if let Ok(mut guard) = self.refresh_history.lock() {
            guard.insert(0, record);

            if guard.len() > MAX_REFRESH_HISTORY {
                guard.truncate(MAX_REFRESH_HISTORY);
            }
        }

        // Persist to disk (fire and forget)
        let _ = self.save_refresh_history();
    }

    /// Update an existing refresh record in place
    pub fn update_refresh_record(&self, id: &str, f: impl FnOnce(&mut RefreshRecord)) {
        if let Ok(mut guard) = self.refresh_history.lock() {
            if let Some(record) = guard.iter_mut().find(|r| r.id == id) {
                f(record);
            }
        }

        let _ = self.save_refresh_history();
    }

    pub fn get_refresh_history(&self, limit: usize) -> Vec<RefreshRecord> {
        self.refresh_history
            .lock()
            .map(|guard| guard.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn save_refresh_history(&self) -> Result<(), String> {
        let history = self
            .refresh_history
            .lock()
            .map_err(|_| "Lock poisoned")?
            .clone();

        let path = self.data_dir.join(HISTORY_FILE);
        let content =
            serde_json::to_string_pretty(&history).map_err(|e| format!("Serialize error: {}", e))?;

        fs::write(&path, content).map_err(|e| format!("Write error: {}", e))?;

        Ok(())
    }
}

/// Get the state directory (~/.shipdeck), creating it if needed
pub fn shipdeck_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    let state_dir = home.join(".shipdeck");

    if !state_dir.exists() {
        fs::create_dir_all(&state_dir).map_err(|e| format!("Failed to create state dir: {}", e))?;
    }

    Ok(state_dir)
}

/// Get the canonical config file path (~/.shipdeck/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    Ok(shipdeck_dir()?.join(CONFIG_FILE))
}

/// Load configuration from ~/.shipdeck/config.json
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with: \
             {{ \"apiBaseUrl\": \"https://fulfill.example.com\" }}",
            path.display()
        ));
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Create or update config.json atomically.
///
/// If config already exists in-memory, clones it, applies the mutator, and
/// writes back. If config is None (first-run), starts from defaults, applies
/// the mutator, and writes + updates in-memory state.
pub fn create_or_update_config(
    state: &AppState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut guard = state.config.lock().map_err(|_| "Lock poisoned")?;

    let mut config = guard.clone().unwrap_or_default();

    mutator(&mut config);

    let path = state.data_dir.join(CONFIG_FILE);
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;

    *guard = Some(config.clone());

    Ok(config)
}

/// Load refresh history from `<data_dir>/refresh_history.json`.
fn load_refresh_history(data_dir: &Path) -> Result<Vec<RefreshRecord>, String> {
    let path = data_dir.join(HISTORY_FILE);

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read history: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse history: {}", e))
}

/// Create a new refresh record
pub fn create_refresh_record(trigger: RefreshTrigger) -> RefreshRecord {
    RefreshRecord {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        started_at: Utc::now(),
        finished_at: None,
        duration_secs: None,
        success: false,
        error_message: None,
        freshness: None,
        days_computed: 0,
        orders_processed: 0,
        orders_skipped: 0,
    }
}
