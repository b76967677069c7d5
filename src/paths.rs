use std::path::PathBuf;
use std::sync::OnceLock;

static GORT_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the Gort home directory (`~/.gort/`).
/// Supports `$GORT_HOME` env override. Cached via `OnceLock`.
pub fn gort_home() -> &'static PathBuf {
    GORT_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("GORT_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gort")
    })
}

/// `~/.gort/config/`
pub fn config_dir() -> PathBuf {
    gort_home().join("config")
}

/// `~/.gort/data/` — the redb database file lives here.
pub fn data_dir() -> PathBuf {
    gort_home().join("data")
}

/// `~/.gort/logs/`
pub fn logs_dir() -> PathBuf {
    gort_home().join("logs")
}

/// `~/.gort/bundles/` — on-disk bundle YAML files.
pub fn bundles_dir() -> PathBuf {
    gort_home().join("bundles")
}

/// Path to the embedded `redb` database file.
pub fn db_path() -> PathBuf {
    data_dir().join("gort.redb")
}
