use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use fanctl::UiClient;
use fanctl_proto::{Battery, RequestFromUi, RequestKind};
use tracing::{info, warn};

use crate::common::{self, ChargeLimit, Report, Toggle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetArgs {
    pub booster: Option<Toggle>,
    pub turbo: Option<Toggle>,
    pub battery: Option<ChargeLimit>,
}

impl SetArgs {
    /// Write request carrying only the requested changes.
    pub fn to_request(self) -> RequestFromUi {
        let mut request = RequestFromUi::with_kind(RequestKind::WriteData);
        if let Some(booster) = self.booster {
            request.boosters.fan_booster = booster.into();
        }
        if let Some(turbo) = self.turbo {
            request.boosters.cpu_turbo = turbo.into();
        }
        if let Some(limit) = self.battery {
            request.battery = Battery::new(limit.into());
        }
        request
    }
}

pub async fn run(args: SetArgs, shm_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let request = args.to_request();
    if !request.has_user_action() {
        bail!("nothing to set; pass --booster, --turbo or --battery");
    }
    let config = common::client_config(shm_dir);
    let block = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut client = UiClient::connect(config).context("connect to daemon")?;
        if !client.apply(request).context("send write request")? {
            bail!("daemon did not answer");
        }
        Ok(client.last_known().clone())
    })
    .await
    .context("join write request")??;

    if block.daemon_device_exception.is_empty() {
        info!(tag = block.tag, "settings applied");
    } else {
        warn!(error = %block.daemon_device_exception, "daemon reported a device failure");
    }
    if json {
        common::print_json(&Report::now(&block)?)?;
    } else {
        common::print_block(&block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanctl_proto::{BatteryLevel, BoosterState, CpuTurboBoostState};

    #[test]
    fn only_given_fields_change() {
        let request = SetArgs {
            booster: Some(Toggle::On),
            ..SetArgs::default()
        }
        .to_request();
        assert_eq!(request.kind, RequestKind::WriteData);
        assert_eq!(request.boosters.fan_booster, BoosterState::On);
        assert_eq!(request.boosters.cpu_turbo, CpuTurboBoostState::NoChange);
        assert_eq!(request.battery.max_level, BatteryLevel::NotKnown);
        assert!(request.has_user_action());
    }

    #[test]
    fn empty_set_has_no_action() {
        assert!(!SetArgs::default().to_request().has_user_action());
    }

    #[test]
    fn charge_limit_maps_to_level() {
        let request = SetArgs {
            battery: Some(ChargeLimit::Balanced),
            turbo: Some(Toggle::Off),
            ..SetArgs::default()
        }
        .to_request();
        assert_eq!(request.battery.max_level, BatteryLevel::Balanced);
        assert_eq!(request.boosters.cpu_turbo, CpuTurboBoostState::Off);
    }
}
