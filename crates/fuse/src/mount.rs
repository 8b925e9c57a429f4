//! Mount lifecycle: build the backend and cache, serve FUSE until told to stop.

use std::path::Path;
use std::sync::Arc;

use flowfs_cache::{CacheError, CacheStore};
use flowfs_ufs::UfsError;
use fuser::MountOption;
use tokio::sync::watch;

use crate::config::{FuseConfig, FuseSection};
use crate::fs::{BlockReader, FlowFs, FsOptions};

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("backend error: {0}")]
    Backend(#[from] UfsError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to mount at {path}: {source}")]
    SpawnFailed {
        path: String,
        source: std::io::Error,
    },
    #[error("unmount failed: {0}")]
    UnmountFailed(String),
}

/// Mount options for the configured platform.
pub fn mount_options(section: &FuseSection) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(section.fs_name.clone()),
        MountOption::DefaultPermissions,
    ];
    if section.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if section.allow_other {
        options.push(MountOption::AllowOther);
    }
    options.push(if section.read_only {
        MountOption::RO
    } else {
        MountOption::RW
    });

    #[cfg(target_os = "macos")]
    {
        options.push(MountOption::CUSTOM(format!("volname={}", section.fs_name)));
        options.push(MountOption::CUSTOM("noappledouble".to_string()));
    }

    options
}

/// Mount the filesystem and block until `shutdown_rx` fires.
///
/// The cache's background reclamation is stopped after the session ends.
pub async fn run_mount(
    config: &FuseConfig,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), MountError> {
    let ufs = config.backend.build().await?;
    let cache = Arc::new(config.cache.build().await?);
    let reader = BlockReader::new(cache.clone(), config.cache.block_size);

    let mount_point = &config.fuse.mount_point;
    if let Err(e) = tokio::fs::create_dir_all(mount_point).await {
        tracing::warn!(mount_point = ?mount_point, error = %e, "failed to create mount point");
    }

    let fs = FlowFs::new(
        tokio::runtime::Handle::current(),
        ufs.clone(),
        reader,
        FsOptions::from(&config.fuse),
    );
    let options = mount_options(&config.fuse);

    tracing::info!(
        mount_point = ?mount_point,
        backend = ufs.name(),
        caching = cache.is_enabled(),
        "mounting FUSE filesystem"
    );
    let session = fuser::spawn_mount2(fs, mount_point, &options).map_err(|source| {
        MountError::SpawnFailed {
            path: mount_point.display().to_string(),
            source,
        }
    })?;

    let _ = shutdown_rx.changed().await;
    tracing::info!(mount_point = ?mount_point, "unmounting");

    // dropping the session unmounts; it may block on requests that call
    // back into this runtime, so keep it off the async workers
    if let Err(e) = tokio::task::spawn_blocking(move || drop(session)).await {
        tracing::error!(error = %e, "FUSE session did not shut down cleanly");
    }
    if let Err(e) = unmount_path(mount_point) {
        tracing::warn!(error = %e, "fallback unmount failed");
    }

    cache.clean().await;
    cache.shutdown().await;
    tracing::info!("mount stopped");
    Ok(())
}

/// Platform-specific unmount, a no-op when the session already tore itself down
fn unmount_path(mount_point: &Path) -> Result<(), MountError> {
    #[cfg(any(target_os = "macos", target_os = "linux"))]
    use std::process::Command;

    #[cfg(target_os = "macos")]
    {
        let status = Command::new("umount")
            .arg(mount_point)
            .status()
            .map_err(|e| MountError::UnmountFailed(e.to_string()))?;

        if !status.success() {
            let _ = Command::new("diskutil")
                .arg("unmount")
                .arg("force")
                .arg(mount_point)
                .status();
        }
    }

    #[cfg(target_os = "linux")]
    {
        let status = Command::new("fusermount")
            .arg("-u")
            .arg(mount_point)
            .status()
            .map_err(|e| MountError::UnmountFailed(e.to_string()))?;

        if !status.success() {
            // lazy unmount as fallback
            let _ = Command::new("fusermount")
                .arg("-uz")
                .arg(mount_point)
                .status();
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        tracing::warn!(mount_point = ?mount_point, "unmount not implemented for this platform");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_options_follow_config() {
        let section = FuseSection {
            allow_other: true,
            read_only: true,
            ..FuseSection::default()
        };
        let options = mount_options(&section);
        assert!(options.contains(&MountOption::FSName("flowfs".to_string())));
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::RO));
        assert!(!options.contains(&MountOption::RW));

        let options = mount_options(&FuseSection {
            auto_unmount: false,
            ..FuseSection::default()
        });
        assert!(!options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::RW));
    }
}
