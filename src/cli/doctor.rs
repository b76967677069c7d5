use anyhow::Result;

use crate::paths;

/// Checks that `$GORT_HOME`'s subdirectories exist and are writable,
/// and that the embedded database opens cleanly. Exits non-zero on
/// the first failure so scripting against it is straightforward.
pub fn run() -> Result<()> {
    println!("GORT_HOME: {}", paths::gort_home().display());

    for (label, dir) in [
        ("config", paths::config_dir()),
        ("data", paths::data_dir()),
        ("logs", paths::logs_dir()),
        ("bundles", paths::bundles_dir()),
    ] {
        std::fs::create_dir_all(&dir)?;
        let writable = dir.metadata().map(|m| !m.permissions().readonly()).unwrap_or(false);
        println!("  {label:<8} {} ({})", dir.display(), if writable { "ok" } else { "read-only!" });
    }

    match gort::persistence::redb_store::RedbStore::new(paths::db_path()) {
        Ok(_) => println!("database: ok ({})", paths::db_path().display()),
        Err(e) => {
            println!("database: FAILED ({e})");
            anyhow::bail!("database check failed");
        }
    }

    Ok(())
}
