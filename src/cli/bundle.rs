use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use gort::model::bundle::BundleFile;
use gort::persistence::Persistence;

pub async fn install(persistence: &Arc<dyn Persistence>, path: &Path, install_user: &str) -> Result<()> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file = BundleFile::parse(&yaml).with_context(|| format!("parsing {}", path.display()))?;
    let name = file.name.clone();
    let version = file.version.clone();
    let bundle = file.into_bundle(install_user.to_string(), Utc::now());
    persistence.bundle_install(bundle).await?;
    println!("installed {name}:{version} (disabled; enable with `gort bundle enable {name} {version}`)");
    Ok(())
}

pub async fn enable(persistence: &Arc<dyn Persistence>, name: &str, version: &str) -> Result<()> {
    persistence.bundle_enable(name, version).await?;
    println!("enabled {name}:{version}");
    Ok(())
}

pub async fn disable(persistence: &Arc<dyn Persistence>, name: &str) -> Result<()> {
    persistence.bundle_disable(name).await?;
    println!("disabled {name}");
    Ok(())
}

pub async fn uninstall(persistence: &Arc<dyn Persistence>, name: &str, version: &str) -> Result<()> {
    persistence.bundle_uninstall(name, version).await?;
    println!("uninstalled {name}:{version}");
    Ok(())
}

pub async fn list(persistence: &Arc<dyn Persistence>) -> Result<()> {
    let bundles = persistence.bundles_all().await?;
    if bundles.is_empty() {
        println!("(no bundles installed)");
        return Ok(());
    }
    for b in bundles {
        let marker = if b.enabled { "*" } else { " " };
        println!("{marker} {}:{} ({} commands)", b.name, b.version, b.commands.len());
    }
    Ok(())
}
