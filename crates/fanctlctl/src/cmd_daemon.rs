use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fanctl::{engage_filter, DaemonConfig, DaemonService, NoSyscallFilter, Runner};
use fanctl_device::Variant;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::common;

#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Work on a register file instead of the embedded controller.
    pub dry_run: bool,
    /// Directory holding all dry-run state; the temp dir if unset.
    pub dry_run_dir: Option<PathBuf>,
    /// 256-byte register dump copied into the dry-run file at start-up.
    pub register_image: Option<PathBuf>,
    /// Engage syscall restrictions once the daemon thread is running.
    pub restrict: bool,
    /// Register layout to use; detected from the controller if unset.
    pub variant: Option<Variant>,
    /// Directory of the shared channel block, overriding the default.
    pub shm_dir: Option<PathBuf>,
    /// Pause between service cycles in milliseconds.
    pub cadence_ms: Option<u64>,
}

impl DaemonArgs {
    pub fn to_config(&self) -> Result<DaemonConfig> {
        let mut config = if self.dry_run {
            let dir = match &self.dry_run_dir {
                Some(dir) => dir.clone(),
                None => std::env::temp_dir(),
            };
            DaemonConfig::dry_run(dir)
        } else {
            if self.register_image.is_some() {
                return Err(anyhow!("--register-image requires --dry-run"));
            }
            DaemonConfig::hardware()
        };
        if let Some(dir) = &self.shm_dir {
            config.channel.shm_dir = dir.clone();
        }
        config.variant = self.variant;
        config.register_image = self.register_image.clone();
        if let Some(ms) = self.cadence_ms {
            config.cadence = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

pub async fn run(args: DaemonArgs) -> Result<()> {
    let config = args.to_config()?;
    info!(access = ?config.access, shm = %config.channel.shm_dir.display(), "starting daemon");
    let mut service = DaemonService::new(config).context("start daemon")?;

    let (done_tx, done_rx) = oneshot::channel();
    let runner = Runner::spawn("fanctl-daemon", move |stop| {
        let result = service.serve(&stop);
        let _ = done_tx.send(());
        result
    })
    .context("spawn daemon thread")?;

    if args.restrict {
        engage_filter(&mut NoSyscallFilter);
    }

    tokio::select! {
        _ = shutdown_signal() => info!("termination requested"),
        _ = done_rx => warn!("daemon thread ended on its own"),
    }

    runner.stop_flag().stop();
    let outcome = tokio::task::spawn_blocking(move || runner.join())
        .await
        .context("join daemon thread")?;
    match outcome {
        Some(result) => result.context("daemon failed")?,
        None => return Err(anyhow!("daemon thread panicked")),
    }
    info!(at = %common::format_system_time(std::time::SystemTime::now())?, "daemon exited cleanly");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};
    match unix_signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable");
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_io::AccessMode;

    #[test]
    fn dry_run_places_everything_in_dir() {
        let args = DaemonArgs {
            dry_run: true,
            dry_run_dir: Some(PathBuf::from("/tmp/fan")),
            cadence_ms: Some(20),
            variant: Some(Variant::IntelGen10),
            ..DaemonArgs::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(
            config.access,
            AccessMode::DryRun {
                dir: PathBuf::from("/tmp/fan")
            }
        );
        assert_eq!(config.channel.shm_dir, PathBuf::from("/tmp/fan"));
        assert_eq!(config.cadence, Duration::from_millis(20));
        assert_eq!(config.variant, Some(Variant::IntelGen10));
    }

    #[test]
    fn image_needs_dry_run() {
        let args = DaemonArgs {
            register_image: Some(PathBuf::from("dump.bin")),
            ..DaemonArgs::default()
        };
        assert!(args.to_config().is_err());
    }

    #[test]
    fn shm_dir_overrides_dry_run_dir() {
        let args = DaemonArgs {
            dry_run: true,
            dry_run_dir: Some(PathBuf::from("/tmp/a")),
            shm_dir: Some(PathBuf::from("/tmp/b")),
            ..DaemonArgs::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.channel.shm_dir, PathBuf::from("/tmp/b"));
    }
}
