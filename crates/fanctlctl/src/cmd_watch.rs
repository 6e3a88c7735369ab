use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use fanctl::{ConnectionState, SessionConfig, UiSession, UiSnapshot};
use fanctl_decide::{FanThresholds, TurboThresholds};
use serde::Serialize;
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::common::{self, Report};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchArgs {
    pub game_mode: bool,
    pub interval_ms: u64,
    /// Stop after this many snapshots.
    pub count: Option<u64>,
    /// Averaged CPU temperature alone that engages the fan booster.
    pub fan_cpu_only: Option<f32>,
    /// Averaged CPU and GPU temperature that together engage the booster.
    pub fan_shared: Option<f32>,
    /// Temperature at which turbo boost may be switched off.
    pub turbo_hot: Option<f32>,
    /// Temperature at which turbo boost may be switched back on.
    pub turbo_cold: Option<f32>,
}

impl WatchArgs {
    pub fn to_config(&self, shm_dir: Option<PathBuf>) -> Result<SessionConfig> {
        let mut config = SessionConfig {
            client: common::client_config(shm_dir),
            ..SessionConfig::default()
        };
        if self.fan_cpu_only.is_some() || self.fan_shared.is_some() {
            config.fan = FanThresholds::new(
                self.fan_cpu_only.unwrap_or(config.fan.cpu_only()),
                self.fan_shared.unwrap_or(config.fan.shared()),
            )
            .context("fan thresholds")?;
        }
        config.turbo = TurboThresholds {
            hot: self.turbo_hot.unwrap_or(config.turbo.hot),
            cold: self.turbo_cold.unwrap_or(config.turbo.cold),
            ..config.turbo
        };
        config.turbo.validate().context("turbo thresholds")?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct WatchLine<'a> {
    connection: &'static str,
    #[serde(flatten)]
    report: Option<Report<'a>>,
}

fn connection_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Healthy => "healthy",
        ConnectionState::DaemonNotResponding => "daemon-not-responding",
        ConnectionState::NoConnection => "no-connection",
    }
}

pub async fn run(args: WatchArgs, shm_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let config = args.to_config(shm_dir)?;
    let mut session = UiSession::start(config).context("start session")?;
    session
        .set_game_mode(args.game_mode)
        .context("start game mode")?;
    let handle = session.handle();
    info!(game_mode = session.is_game_mode(), "watching daemon");

    let mut ticker = time::interval(Duration::from_millis(args.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut printed = 0u64;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick() => {
                show(&handle.last_known(), json)?;
                printed += 1;
                if args.count.is_some_and(|limit| printed >= limit) {
                    break;
                }
                if !session.is_running() {
                    warn!("communicator stopped");
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || drop(session))
        .await
        .context("stop session")?;
    Ok(())
}

fn show(snapshot: &UiSnapshot, json: bool) -> Result<()> {
    if json {
        let report = snapshot.info.as_ref().map(Report::now).transpose()?;
        let line = WatchLine {
            connection: connection_name(snapshot.connection),
            report,
        };
        let text = serde_json::to_string(&line).context("serialise JSON output")?;
        println!("{text}");
        return Ok(());
    }
    println!("[{}]", connection_name(snapshot.connection));
    match &snapshot.info {
        Some(block) => common::print_block(block),
        None => println!("no data yet"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_session_thresholds() {
        let config = WatchArgs::default().to_config(None).unwrap();
        assert_eq!(config.fan, FanThresholds::default());
        assert_eq!(config.turbo, TurboThresholds::default());
    }

    #[test]
    fn fan_overrides_are_validated() {
        let args = WatchArgs {
            fan_cpu_only: Some(70.0),
            fan_shared: Some(75.0),
            ..WatchArgs::default()
        };
        assert!(args.to_config(None).is_err());

        let args = WatchArgs {
            fan_shared: Some(60.0),
            ..WatchArgs::default()
        };
        let config = args.to_config(None).unwrap();
        assert_eq!(config.fan.shared(), 60.0);
        assert_eq!(config.fan.cpu_only(), 91.0);
    }

    #[test]
    fn turbo_overrides_are_validated() {
        let args = WatchArgs {
            turbo_hot: Some(60.0),
            ..WatchArgs::default()
        };
        assert!(args.to_config(None).is_err());

        let args = WatchArgs {
            turbo_hot: Some(f32::NAN),
            ..WatchArgs::default()
        };
        assert!(args.to_config(None).is_err());

        let args = WatchArgs {
            turbo_cold: Some(75.0),
            ..WatchArgs::default()
        };
        let config = args.to_config(None).expect("valid turbo thresholds");
        assert_eq!(config.turbo.cold, 75.0);
        assert_eq!(config.turbo.hot, TurboThresholds::default().hot);
    }

    #[test]
    fn missing_data_still_reports_connection() {
        let line = WatchLine {
            connection: connection_name(ConnectionState::NoConnection),
            report: None,
        };
        let value = serde_json::to_value(&line).unwrap();
        assert_eq!(value["connection"], "no-connection");
    }
}
