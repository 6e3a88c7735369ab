use std::thread;
use std::time::{Duration, Instant};

use fanctl_proto::consts::MINIMUM_SERVICE_DELAY;
use fanctl_proto::{ChannelConfig, FullInfoBlock, RequestFromUi, RequestKind, SharedChannel};
use tracing::{debug, trace, warn};

use crate::runner::StopFlag;
use crate::staleness::StalenessTracker;
use crate::ServiceError;

/// Session side connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    /// Expected daemon cadence; the client waits this long between checks
    /// for an answer.
    pub service_delay: Duration,
    /// Give up waiting for an answer after this long.
    pub answer_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            service_delay: MINIMUM_SERVICE_DELAY,
            answer_timeout: MINIMUM_SERVICE_DELAY * 4,
        }
    }
}

/// Talks to the daemon through the shared channel.
///
/// Every call leaves one request, then blocks for at least one service
/// delay until the daemon answered with a newer tag. `Ok(false)` means the
/// daemon did not answer in time or the answer could not be decoded.
pub struct UiClient {
    channel: SharedChannel,
    config: ClientConfig,
    last_known: FullInfoBlock,
    staleness: StalenessTracker,
    stop: Option<StopFlag>,
}

impl UiClient {
    pub fn connect(config: ClientConfig) -> Result<Self, ServiceError> {
        let channel = SharedChannel::open_for_ui(config.channel.clone())?;
        debug!(name = %config.channel.name, "connected to daemon channel");
        Ok(Self {
            channel,
            config,
            last_known: FullInfoBlock::default(),
            staleness: StalenessTracker::default(),
            stop: None,
        })
    }

    /// Abort waits as soon as `stop` is raised.
    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn last_known(&self) -> &FullInfoBlock {
        &self.last_known
    }

    pub fn is_possibly_broken(&self) -> bool {
        self.staleness.is_possibly_broken()
    }

    /// Liveness check; the daemon only advances the tag.
    pub fn ping(&mut self) -> Result<bool, ServiceError> {
        self.exchange(&RequestFromUi::with_kind(RequestKind::Ping))
    }

    /// Ask for a fresh hardware read. Wakes the embedded controller, so
    /// should not be used too often.
    pub fn refresh(&mut self) -> Result<bool, ServiceError> {
        self.exchange(&RequestFromUi::with_kind(RequestKind::ReadFreshData))
    }

    /// Apply the user's settings, then read back.
    pub fn apply(&mut self, mut request: RequestFromUi) -> Result<bool, ServiceError> {
        request.kind = RequestKind::WriteData;
        self.exchange(&request)
    }

    fn exchange(&mut self, request: &RequestFromUi) -> Result<bool, ServiceError> {
        let before = self.last_known.tag;
        {
            let mut guard = self.channel.lock()?;
            guard.write_request(request)?;
            guard.set_request_pending(true);
        }
        trace!(kind = ?request.kind, before, "request left for daemon");

        let deadline = Instant::now() + self.config.answer_timeout;
        loop {
            if !self.pause(self.config.service_delay) {
                return Ok(false);
            }
            let answer = {
                let guard = self.channel.lock()?;
                (!guard.is_request_pending()).then(|| guard.read_info())
            };
            match answer {
                Some(Ok(info)) if info.tag > before => {
                    self.staleness.observe(info.tag);
                    self.last_known = info;
                    return Ok(true);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "discarding corrupt daemon answer");
                    self.staleness.observe(before);
                    return Ok(false);
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                self.staleness.observe(before);
                debug!(kind = ?request.kind, "daemon did not answer in time");
                return Ok(false);
            }
        }
    }

    fn pause(&self, duration: Duration) -> bool {
        match &self.stop {
            Some(stop) => stop.sleep(duration),
            None => {
                thread::sleep(duration);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonConfig, DaemonService};
    use crate::runner::Runner;
    use fanctl_device::Variant;
    use fanctl_proto::{BoosterState, CpuTurboBoostState};
    use std::fs;
    use std::path::Path;

    const FAST: Duration = Duration::from_millis(10);

    fn start_daemon(dir: &Path) -> Runner<Result<(), ServiceError>> {
        let mut image = vec![0u8; ec_io::consts::REGISTER_FILE_SIZE];
        image[0x68] = 45;
        image[0xD4] = 141;
        image[0xEF] = 0x80 + 80;
        let path = dir.join("image.bin");
        fs::write(&path, image).expect("image");
        let mut service = DaemonService::new(DaemonConfig {
            variant: Some(Variant::IntelGen10),
            register_image: Some(path),
            cadence: FAST,
            ..DaemonConfig::dry_run(dir)
        })
        .expect("daemon");
        Runner::spawn("test-daemon", move |stop| service.serve(&stop)).expect("spawn")
    }

    fn client_config(dir: &Path) -> ClientConfig {
        ClientConfig {
            channel: ChannelConfig {
                shm_dir: dir.to_path_buf(),
                ..ChannelConfig::default()
            },
            service_delay: FAST,
            answer_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn connect_fails_without_daemon() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(UiClient::connect(client_config(dir.path())).is_err());
    }

    #[test]
    fn ping_refresh_and_apply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let daemon = start_daemon(dir.path());
        let mut client = UiClient::connect(client_config(dir.path())).expect("connect");

        assert!(client.ping().expect("ping"));
        assert_eq!(client.last_known().tag, 1);

        assert!(client.refresh().expect("refresh"));
        assert_eq!(client.last_known().info.cpu.temperature, 45);

        let mut request = RequestFromUi::default();
        request.boosters.fan_booster = BoosterState::On;
        request.boosters.cpu_turbo = CpuTurboBoostState::Off;
        assert!(client.apply(request).expect("apply"));
        assert_eq!(client.last_known().boosters.fan_booster, BoosterState::On);
        assert_eq!(client.last_known().tag, 3);
        assert!(!client.is_possibly_broken());

        assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
    }

    #[test]
    fn silent_daemon_is_flagged() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A channel nobody serves.
        let _channel = SharedChannel::create_for_daemon(client_config(dir.path()).channel).expect("channel");
        let mut client = UiClient::connect(ClientConfig {
            answer_timeout: Duration::from_millis(20),
            ..client_config(dir.path())
        })
        .expect("connect");
        // The first unanswered ping only records the starting tag.
        for _ in 0..6 {
            assert!(!client.ping().expect("ping"));
        }
        assert!(client.is_possibly_broken());
    }
}
