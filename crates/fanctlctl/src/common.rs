use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::ValueEnum;
use fanctl::ClientConfig;
use fanctl_proto::{BatteryLevel, BoosterState, ChannelConfig, CpuTurboBoostState, FullInfoBlock};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl From<Toggle> for BoosterState {
    fn from(value: Toggle) -> Self {
        match value {
            Toggle::On => BoosterState::On,
            Toggle::Off => BoosterState::Off,
        }
    }
}

impl From<Toggle> for CpuTurboBoostState {
    fn from(value: Toggle) -> Self {
        match value {
            Toggle::On => CpuTurboBoostState::On,
            Toggle::Off => CpuTurboBoostState::Off,
        }
    }
}

/// Battery charge limit as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChargeLimit {
    /// Stop at 60%.
    Battery,
    /// Stop at 80%.
    Balanced,
    /// Charge to 100%.
    Mobility,
}

impl From<ChargeLimit> for BatteryLevel {
    fn from(value: ChargeLimit) -> Self {
        match value {
            ChargeLimit::Battery => BatteryLevel::BestForBattery,
            ChargeLimit::Balanced => BatteryLevel::Balanced,
            ChargeLimit::Mobility => BatteryLevel::BestForMobility,
        }
    }
}

pub fn channel_config(shm_dir: Option<PathBuf>) -> ChannelConfig {
    let mut config = ChannelConfig::default();
    if let Some(dir) = shm_dir {
        config.shm_dir = dir;
    }
    config
}

pub fn client_config(shm_dir: Option<PathBuf>) -> ClientConfig {
    ClientConfig {
        channel: channel_config(shm_dir),
        ..ClientConfig::default()
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{json}");
    Ok(())
}

pub fn format_system_time(time: SystemTime) -> Result<String> {
    let datetime = OffsetDateTime::from(time);
    datetime
        .format(&Rfc3339)
        .context("format timestamp as RFC 3339")
}

/// One snapshot with the moment it was taken, for JSON output.
#[derive(Serialize)]
pub struct Report<'a> {
    pub read_at: String,
    #[serde(flatten)]
    pub block: &'a FullInfoBlock,
}

impl<'a> Report<'a> {
    pub fn now(block: &'a FullInfoBlock) -> Result<Self> {
        Ok(Self {
            read_at: format_system_time(SystemTime::now())?,
            block,
        })
    }
}

/// Human readable rendering of a snapshot.
pub fn print_block(block: &FullInfoBlock) {
    let cpu = &block.info.cpu;
    let gpu = &block.info.gpu;
    println!("{:<10} {:>6} {:>8}", "ZONE", "TEMP", "FAN");
    println!("{:<10} {:>5}C {:>8}", "cpu", cpu.temperature, cpu.fan_rpm);
    println!("{:<10} {:>5}C {:>8}", "gpu", gpu.temperature, gpu.fan_rpm);
    println!("fan booster: {:?}", block.boosters.fan_booster);
    println!("cpu turbo:   {:?}", block.boosters.cpu_turbo);
    println!("behave:      {:?}", block.behave.behave);
    println!("battery:     {:?}", block.battery.max_level);
    if !block.daemon_device_exception.is_empty() {
        println!("device error: {}", block.daemon_device_exception);
    }
    println!("tag:         {}", block.tag);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn epoch_formats_as_rfc3339() {
        let text = format_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1)).unwrap();
        assert_eq!(text, "1970-01-01T00:00:01Z");
    }

    #[test]
    fn report_flattens_block() {
        let block = FullInfoBlock {
            tag: 7,
            ..FullInfoBlock::default()
        };
        let report = Report {
            read_at: "now".into(),
            block: &block,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["tag"], 7);
        assert_eq!(value["read_at"], "now");
    }

    #[test]
    fn shm_dir_override() {
        let config = client_config(Some(PathBuf::from("/tmp/x")));
        assert_eq!(config.channel.shm_dir, PathBuf::from("/tmp/x"));
        assert_eq!(channel_config(None), ChannelConfig::default());
    }
}
