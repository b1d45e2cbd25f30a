use std::path::{Path, PathBuf};

use clap::ArgMatches;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::GlobalConfig;

/// Reloads the configuration whenever the manifest file changes.
///
/// The parent directory is watched instead of the file itself so editors
/// that replace the file on save keep triggering reloads. The returned
/// watcher must be kept alive for as long as reloads are wanted.
pub fn watch_manifest(
    manifest: PathBuf,
    args: ArgMatches,
    config: GlobalConfig,
) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let file_name = manifest.file_name().map(ToOwned::to_owned);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let touches_manifest = event
                .paths
                .iter()
                .any(|path| path.file_name() == file_name.as_deref());
            if touches_manifest && (event.kind.is_modify() || event.kind.is_create()) {
                // A full channel already has a reload queued.
                let _ = tx.try_send(());
            }
        }
        Err(error) => tracing::warn!("Manifest watcher error: {error}"),
    })?;

    let dir = match manifest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!("Watching {manifest:?} for changes");

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            reload(&args, &config).await;
        }
    });

    Ok(watcher)
}

async fn reload(args: &ArgMatches, config: &GlobalConfig) {
    let new_config = match deployhook_config::from_matches(args) {
        Ok(new_config) => new_config,
        Err(error) => {
            tracing::error!("Keeping previous configuration, reload failed: {error}");
            return;
        }
    };

    let mut current = config.write().await;
    if new_config.port != current.port {
        tracing::warn!("Port changes only take effect after a restart");
    }
    if new_config.log_file != current.log_file {
        tracing::warn!("Audit log location changes only take effect after a restart");
    }
    *current = new_config;
    tracing::info!("Configuration reloaded");
}
