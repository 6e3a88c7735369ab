use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ec_io::consts::BACKUP_BLOCK_NAME;
use ec_io::{
    AccessMode, BackupBlock, BackupProvider, EcResource, OneLineBackup, RegisterTransport,
    TurboBoostFlag,
};
use fanctl_device::{DeviceController, DeviceError, Variant};
use fanctl_proto::consts::MINIMUM_SERVICE_DELAY;
use fanctl_proto::{BehaveState, ChannelConfig, FullInfoBlock, RequestFromUi, RequestKind, SharedChannel};
use tracing::{debug, error, info, warn};

use crate::consts::{CPUINFO_PATH, PROTECTED_REGULAR_PATH};
use crate::runner::StopFlag;
use crate::ServiceError;

/// Everything the daemon needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub access: AccessMode,
    pub channel: ChannelConfig,
    /// Forced hardware variant; detected from the CPU when `None`.
    pub variant: Option<Variant>,
    /// Pause between two service cycles.
    pub cadence: Duration,
    pub cpuinfo: PathBuf,
    /// Register dump loaded into the dry-run file before anything else.
    pub register_image: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn hardware() -> Self {
        Self {
            access: AccessMode::Hardware,
            channel: ChannelConfig::default(),
            variant: None,
            cadence: MINIMUM_SERVICE_DELAY,
            cpuinfo: PathBuf::from(CPUINFO_PATH),
            register_image: None,
        }
    }

    /// Dry run with the register file, the backup and the channel all
    /// placed inside `dir`.
    pub fn dry_run(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            access: AccessMode::DryRun { dir: dir.clone() },
            channel: ChannelConfig {
                shm_dir: dir,
                ..ChannelConfig::default()
            },
            ..Self::hardware()
        }
    }
}

/// The privileged side: owns the device and serves the shared channel.
///
/// Field order is drop order: the device goes first so its transport can
/// restore touched registers from the backup, then the channel is removed,
/// then the turbo flag is put back.
pub struct DaemonService {
    device: DeviceController,
    channel: SharedChannel,
    _turbo_backup: OneLineBackup,
    last: FullInfoBlock,
    cadence: Duration,
}

impl DaemonService {
    /// Backup first, then the device, then the channel.
    pub fn new(config: DaemonConfig) -> Result<Self, ServiceError> {
        let resource = EcResource::new(&config.access)?;
        if let Some(image) = &config.register_image {
            resource.load_image(&fs::read(image)?)?;
        }

        let backup_dir = match &config.access {
            AccessMode::DryRun { dir } => dir.clone(),
            AccessMode::Hardware => config.channel.shm_dir.clone(),
        };
        let backup = match BackupBlock::open_or_capture(&backup_dir, BACKUP_BLOCK_NAME, &resource) {
            Ok(block) => {
                info!(fresh = block.captured_now(), "register backup available");
                Some(Arc::new(block) as Arc<dyn BackupProvider>)
            }
            Err(err) => {
                warn!(error = %err, "register backup disabled");
                None
            }
        };

        let turbo = TurboBoostFlag::new(&config.access)?;
        let turbo_backup = OneLineBackup::capture(turbo.path());
        let transport = RegisterTransport::new(resource, backup);
        let variant = select_variant(&config, &transport)?;
        let device = DeviceController::new(variant.table(), transport, turbo);

        let channel = {
            let _relaxed = matches!(config.access, AccessMode::Hardware)
                .then(|| OneLineBackup::override_with(PROTECTED_REGULAR_PATH, "0"));
            SharedChannel::create_for_daemon(config.channel.clone())?
        };
        info!(%variant, cadence = ?config.cadence, "daemon ready");

        Ok(Self {
            device,
            channel,
            _turbo_backup: turbo_backup,
            last: FullInfoBlock::default(),
            cadence: config.cadence,
        })
    }

    pub fn device(&self) -> &DeviceController {
        &self.device
    }

    /// The block published last.
    pub fn last_published(&self) -> &FullInfoBlock {
        &self.last
    }

    /// Serve one pending request, if any. Returns whether a block was
    /// published.
    pub fn communicate(&mut self) -> Result<bool, ServiceError> {
        let request = {
            let mut guard = self.channel.lock()?;
            if !guard.is_request_pending() {
                return Ok(false);
            }
            let decoded = guard.read_request();
            guard.set_request_pending(false);
            match decoded {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "dropping undecodable request");
                    return Ok(false);
                }
            }
        };

        self.last.tag += 1;
        debug!(tag = self.last.tag, kind = ?request.kind, "serving request");
        if request.kind != RequestKind::Ping {
            self.refresh(&request)?;
        }

        let mut guard = self.channel.lock()?;
        guard.write_info(&self.last)?;
        Ok(true)
    }

    /// Run [`communicate`](Self::communicate) every cadence until stopped or
    /// a fatal error occurs.
    pub fn serve(&mut self, stop: &StopFlag) -> Result<(), ServiceError> {
        info!("daemon serving");
        while !stop.is_stopped() {
            match self.communicate() {
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "fatal device error, stopping");
                    return Err(err);
                }
                Err(err) => warn!(error = %err, "service cycle failed"),
            }
            stop.sleep(self.cadence);
        }
        info!("daemon stopped");
        Ok(())
    }

    fn refresh(&mut self, request: &RequestFromUi) -> Result<(), ServiceError> {
        let write_error = if request.kind == RequestKind::WriteData {
            self.apply(request)?
        } else {
            None
        };

        let tag = self.last.tag;
        match self.device.read_full_information(tag) {
            Ok(block) => self.last = block,
            Err(err) if !err.is_fatal() => {
                warn!(error = %err, "failure reading device");
                self.last.daemon_device_exception = err.to_string();
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(err) = write_error {
            self.last.daemon_device_exception = err.to_string();
        }
        Ok(())
    }

    /// Apply a write request. Recoverable failures do not stop the remaining
    /// writes; the first of them is returned for reporting.
    fn apply(&mut self, request: &RequestFromUi) -> Result<Option<DeviceError>, DeviceError> {
        let mut first = None;
        if request.behave.behave != BehaveState::NoChange {
            keep_first(&mut first, self.device.set_behave_state(&request.behave))?;
        }
        keep_first(&mut first, self.device.set_boosters(request.boosters))?;
        keep_first(&mut first, self.device.set_battery(&request.battery))?;
        Ok(first)
    }
}

fn keep_first(first: &mut Option<DeviceError>, outcome: Result<(), DeviceError>) -> Result<(), DeviceError> {
    match outcome {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(error = %err, "write request partially failed");
            first.get_or_insert(err);
            Ok(())
        }
    }
}

fn select_variant(config: &DaemonConfig, transport: &RegisterTransport) -> Result<Variant, ServiceError> {
    if let Some(variant) = config.variant {
        return Ok(variant);
    }
    match Variant::from_cpuinfo(&config.cpuinfo) {
        Ok(Some(variant)) => Ok(variant),
        Ok(None) => Ok(Variant::probe(transport)?),
        Err(err) => {
            warn!(error = %err, "cpu identification failed, probing registers");
            Ok(Variant::probe(transport)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_io::consts::REGISTER_FILE_SIZE;
    use fanctl_proto::{Battery, BatteryLevel, BoosterState, CpuTurboBoostState};
    use std::path::Path;

    fn image(bytes: &[(usize, u8)]) -> Vec<u8> {
        let mut image = vec![0u8; REGISTER_FILE_SIZE];
        for &(offset, value) in bytes {
            image[offset] = value;
        }
        image
    }

    /// Gen10 machine at 60 °C, auto mode, booster off, battery at 100%.
    fn plausible_image() -> Vec<u8> {
        image(&[
            (0x68, 60),
            (0xC8, 0x01),
            (0xC9, 0xDE),
            (0x80, 50),
            (0xD4, 13),
            (0xEF, 0x80 + 100),
        ])
    }

    fn config(dir: &Path, image: Vec<u8>) -> DaemonConfig {
        let path = dir.join("image.bin");
        fs::write(&path, image).expect("image");
        DaemonConfig {
            variant: Some(Variant::IntelGen10),
            register_image: Some(path),
            ..DaemonConfig::dry_run(dir)
        }
    }

    fn ui(dir: &Path) -> SharedChannel {
        SharedChannel::open_for_ui(ChannelConfig {
            shm_dir: dir.to_path_buf(),
            ..ChannelConfig::default()
        })
        .expect("ui side")
    }

    fn push(ui: &mut SharedChannel, request: &RequestFromUi) {
        let mut guard = ui.lock().expect("lock");
        guard.write_request(request).expect("encode");
        guard.set_request_pending(true);
    }

    fn answer(ui: &mut SharedChannel) -> FullInfoBlock {
        let guard = ui.lock().expect("lock");
        assert!(!guard.is_request_pending());
        guard.read_info().expect("decode")
    }

    #[test]
    fn idle_channel_publishes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        assert!(!daemon.communicate().expect("cycle"));
        assert_eq!(daemon.last_published().tag, 0);
    }

    #[test]
    fn ping_only_advances_the_tag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        let mut ui = ui(dir.path());

        push(&mut ui, &RequestFromUi::with_kind(RequestKind::Ping));
        assert!(daemon.communicate().expect("cycle"));
        let block = answer(&mut ui);
        assert_eq!(block.tag, 1);
        assert_eq!(block.info.cpu.temperature, 0);
    }

    #[test]
    fn read_request_publishes_fresh_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        let mut ui = ui(dir.path());

        push(&mut ui, &RequestFromUi::with_kind(RequestKind::ReadFreshData));
        daemon.communicate().expect("cycle");
        let block = answer(&mut ui);
        assert_eq!(block.tag, 1);
        assert_eq!(block.info.cpu.temperature, 60);
        assert_eq!(block.info.cpu.fan_rpm, 1000);
        assert_eq!(block.battery.max_level, BatteryLevel::BestForMobility);
        assert!(block.daemon_device_exception.is_empty());
    }

    #[test]
    fn write_request_is_applied_then_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        let mut ui = ui(dir.path());

        let mut request = RequestFromUi::with_kind(RequestKind::WriteData);
        request.boosters.fan_booster = BoosterState::On;
        request.boosters.cpu_turbo = CpuTurboBoostState::Off;
        request.battery = Battery::new(BatteryLevel::Balanced);
        push(&mut ui, &request);
        daemon.communicate().expect("cycle");

        let block = answer(&mut ui);
        assert_eq!(block.boosters.fan_booster, BoosterState::On);
        assert_eq!(block.boosters.cpu_turbo, CpuTurboBoostState::Off);
        assert_eq!(block.battery.max_level, BatteryLevel::Balanced);
        let pending = daemon.device().transport().pending_restore();
        assert!(pending.contains(&0x98));
        assert!(!pending.contains(&0xEF));
    }

    #[test]
    fn garbage_request_is_dropped_and_flag_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        let mut ui = ui(dir.path());
        {
            let mut guard = ui.lock().expect("lock");
            guard.set_request_pending(true);
        }
        assert!(!daemon.communicate().expect("cycle"));
        assert!(!ui.lock().expect("lock").is_request_pending());
        assert_eq!(daemon.last_published().tag, 0);
    }

    #[test]
    fn recoverable_device_error_is_reported_as_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = image(&[(0xD4, 99), (0xEF, 0x80 + 60)]);
        let mut daemon = DaemonService::new(config(dir.path(), broken)).expect("daemon");
        let mut ui = ui(dir.path());

        push(&mut ui, &RequestFromUi::with_kind(RequestKind::ReadFreshData));
        daemon.communicate().expect("recoverable");
        let block = answer(&mut ui);
        assert_eq!(block.tag, 1);
        assert!(block.daemon_device_exception.contains("behave"));
    }

    #[test]
    fn detection_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let no_battery = image(&[(0xD4, 13)]);
        let mut daemon = DaemonService::new(config(dir.path(), no_battery)).expect("daemon");
        let mut ui = ui(dir.path());

        push(&mut ui, &RequestFromUi::with_kind(RequestKind::ReadFreshData));
        let err = daemon.communicate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn registers_are_restored_when_the_daemon_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon = DaemonService::new(config(dir.path(), plausible_image())).expect("daemon");
        let register_file = daemon.device().transport().resource().path().to_path_buf();
        let mut ui = ui(dir.path());

        let mut request = RequestFromUi::with_kind(RequestKind::WriteData);
        request.boosters.fan_booster = BoosterState::On;
        request.battery = Battery::new(BatteryLevel::BestForBattery);
        push(&mut ui, &request);
        daemon.communicate().expect("cycle");
        drop(daemon);

        let after = fs::read(register_file).expect("read");
        assert_eq!(after[0x98], 0x00);
        assert_eq!(after[0xEF], 0x80 + 60);
        assert!(!dir.path().join(fanctl_proto::consts::CHANNEL_NAME).exists());
    }
}
