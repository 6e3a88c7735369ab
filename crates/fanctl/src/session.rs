//! Background threads of the user session: the communicator that keeps the
//! daemon snapshot fresh and the optional game mode decider.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fanctl_decide::{BoostersOnOffDecider, FanThresholds, PollScheduler, TurboThresholds};
use fanctl_proto::consts::MINIMUM_SERVICE_DELAY;
use fanctl_proto::{
    BoosterState, BoostersStates, CpuTurboBoostState, FullInfoBlock, RequestFromUi, RequestKind,
};
use tracing::{debug, error, info, warn};

use crate::client::{ClientConfig, UiClient};
use crate::consts::{BUSY_LOOP_DELAY, GAME_MODE_EXTRA_DELAY, IDLE_LOOP_DELAY, PING_EVERY, RECONNECT_DELAY};
use crate::mailbox::Mailbox;
use crate::runner::{Runner, StopFlag};
use crate::ServiceError;

/// Trust level of the displayed data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Daemon answers and the tag advances.
    Healthy,
    /// Connected, but answers are missing or stale.
    DaemonNotResponding,
    /// No channel; the communicator retries.
    #[default]
    NoConnection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiSnapshot {
    pub info: Option<FullInfoBlock>,
    pub connection: ConnectionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub client: ClientConfig,
    pub poll: PollScheduler,
    pub fan: FanThresholds,
    pub turbo: TurboThresholds,
    pub busy_delay: Duration,
    pub idle_delay: Duration,
    pub reconnect_delay: Duration,
    pub game_mode_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            poll: PollScheduler::default(),
            fan: FanThresholds::default(),
            turbo: TurboThresholds::default(),
            busy_delay: BUSY_LOOP_DELAY,
            idle_delay: IDLE_LOOP_DELAY,
            reconnect_delay: RECONNECT_DELAY,
            game_mode_delay: MINIMUM_SERVICE_DELAY + GAME_MODE_EXTRA_DELAY,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    outbound: Mailbox<RequestFromUi>,
    for_decider: Mailbox<FullInfoBlock>,
    snapshot: Mutex<UiSnapshot>,
}

impl Shared {
    fn publish(&self, info: FullInfoBlock, connection: ConnectionState) {
        self.for_decider.put(info.clone());
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.info = Some(info);
        snapshot.connection = connection;
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connection = connection;
    }
}

/// What the presentation layer holds on to.
#[derive(Debug, Clone)]
pub struct UiHandle {
    shared: Arc<Shared>,
}

impl UiHandle {
    /// Latest known daemon data; never blocks on the daemon.
    pub fn last_known(&self) -> UiSnapshot {
        self.shared
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fold a user change into the pending write request.
    pub fn merge_request<F: FnOnce(&mut RequestFromUi)>(&self, edit: F) {
        self.shared.outbound.merge(|request| {
            request.kind = RequestKind::WriteData;
            edit(request);
        });
    }

    /// Queue a plain request, replacing whatever was pending.
    pub fn send_request(&self, request: RequestFromUi) {
        self.shared.outbound.put(request);
    }
}

/// Communicator thread plus the optional game mode thread.
pub struct UiSession {
    config: SessionConfig,
    handle: UiHandle,
    game_mode: Option<Runner>,
    communicator: Runner,
}

impl UiSession {
    pub fn start(config: SessionConfig) -> Result<Self, ServiceError> {
        let handle = UiHandle {
            shared: Arc::new(Shared::default()),
        };
        let shared = handle.shared.clone();
        let loop_config = config.clone();
        let communicator = Runner::spawn("fanctl-communicator", move |stop| {
            communicator_loop(&shared, &loop_config, &stop)
        })?;
        Ok(Self {
            config,
            handle,
            game_mode: None,
            communicator,
        })
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    pub fn is_game_mode(&self) -> bool {
        self.game_mode.as_ref().is_some_and(|runner| !runner.is_finished())
    }

    /// Start or stop the automatic booster decider.
    pub fn set_game_mode(&mut self, enabled: bool) -> Result<(), ServiceError> {
        if !enabled {
            if self.game_mode.take().is_some() {
                info!("game mode off");
            }
            return Ok(());
        }
        if self.is_game_mode() {
            return Ok(());
        }
        let decider = BoostersOnOffDecider::<3>::new(self.config.fan, self.config.turbo)?;
        let shared = self.handle.shared.clone();
        let delay = self.config.game_mode_delay;
        self.game_mode = Some(Runner::spawn("fanctl-game-mode", move |stop| {
            game_mode_loop(decider, &shared, delay, &stop)
        })?);
        info!("game mode on");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.communicator.is_finished()
    }
}

fn communicator_loop(shared: &Shared, config: &SessionConfig, stop: &StopFlag) {
    while !stop.is_stopped() {
        match serve_client(shared, config, stop) {
            Ok(()) => break,
            Err(err) => {
                warn!(error = %err, "no connection to the daemon, retrying");
                shared.set_connection(ConnectionState::NoConnection);
                if !stop.sleep(config.reconnect_delay) {
                    break;
                }
            }
        }
    }
    debug!("communicator stopped");
}

/// One connection attempt; returns `Ok` only when stopped.
fn serve_client(shared: &Shared, config: &SessionConfig, stop: &StopFlag) -> Result<(), ServiceError> {
    let mut client = UiClient::connect(config.client.clone())?.with_stop(stop.clone());
    info!("connected to the daemon");
    let mut ping_ok = true;
    let mut had_user_action = false;

    for loops in 0u64.. {
        if stop.is_stopped() {
            break;
        }
        match shared.outbound.take() {
            None => {
                let divisor = config
                    .poll
                    .divisor(client.last_known().info.cpu.temperature, ping_ok);
                if had_user_action || loops % u64::from(divisor) == 0 {
                    ping_ok = client.refresh()?;
                } else if loops % PING_EVERY == 0 && !client.ping()? {
                    return Err(ServiceError::DaemonStopped);
                }
                had_user_action = false;
            }
            Some(request) if request.kind == RequestKind::WriteData => {
                had_user_action = request.has_user_action();
                if had_user_action {
                    ping_ok = client.apply(request)?;
                }
            }
            Some(request) if request.kind == RequestKind::ReadFreshData => {
                ping_ok = client.refresh()?;
            }
            Some(_) => {
                ping_ok = client.ping()?;
            }
        }

        let connection = if ping_ok && !client.is_possibly_broken() {
            ConnectionState::Healthy
        } else {
            ConnectionState::DaemonNotResponding
        };
        shared.publish(client.last_known().clone(), connection);

        let pause = if had_user_action {
            config.busy_delay
        } else {
            config.idle_delay
        };
        if !stop.sleep(pause) {
            break;
        }
    }
    Ok(())
}

fn game_mode_loop(mut decider: BoostersOnOffDecider<3>, shared: &Shared, delay: Duration, stop: &StopFlag) {
    while !stop.is_stopped() {
        let snapshot = shared.for_decider.take();
        match decider.compute(snapshot.as_ref()) {
            Ok(delta) if delta.has_any_change() => {
                debug!(delta = ?delta, "game mode requests boosters");
                shared.outbound.merge(|request| {
                    request.kind = RequestKind::WriteData;
                    merge_boosters(&mut request.boosters, delta);
                });
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "game mode decider failed, stopping it");
                return;
            }
        }
        if !stop.sleep(delay) {
            break;
        }
    }
}

fn merge_boosters(into: &mut BoostersStates, delta: BoostersStates) {
    if delta.fan_booster != BoosterState::NoChange {
        into.fan_booster = delta.fan_booster;
    }
    if delta.cpu_turbo != CpuTurboBoostState::NoChange {
        into.cpu_turbo = delta.cpu_turbo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonConfig, DaemonService};
    use fanctl_device::Variant;
    use fanctl_proto::ChannelConfig;
    use std::path::Path;
    use std::time::Instant;

    const FAST: Duration = Duration::from_millis(10);

    fn fast_config(dir: &Path) -> SessionConfig {
        SessionConfig {
            client: ClientConfig {
                channel: ChannelConfig {
                    shm_dir: dir.to_path_buf(),
                    ..ChannelConfig::default()
                },
                service_delay: FAST,
                answer_timeout: Duration::from_millis(500),
            },
            busy_delay: FAST,
            idle_delay: FAST,
            reconnect_delay: FAST,
            game_mode_delay: FAST,
            ..SessionConfig::default()
        }
    }

    fn wait_for(handle: &UiHandle, what: impl Fn(&UiSnapshot) -> bool) -> UiSnapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = handle.last_known();
            if what(&snapshot) || Instant::now() > deadline {
                return snapshot;
            }
            std::thread::sleep(FAST);
        }
    }

    #[test]
    fn merge_keeps_no_change_fields() {
        let mut current = BoostersStates {
            fan_booster: BoosterState::On,
            cpu_turbo: CpuTurboBoostState::NoChange,
        };
        merge_boosters(
            &mut current,
            BoostersStates {
                fan_booster: BoosterState::NoChange,
                cpu_turbo: CpuTurboBoostState::Off,
            },
        );
        assert_eq!(current.fan_booster, BoosterState::On);
        assert_eq!(current.cpu_turbo, CpuTurboBoostState::Off);
    }

    #[test]
    fn handle_merges_into_a_write_request() {
        let handle = UiHandle {
            shared: Arc::new(Shared::default()),
        };
        handle.merge_request(|r| r.boosters.fan_booster = BoosterState::On);
        handle.merge_request(|r| r.boosters.cpu_turbo = CpuTurboBoostState::Off);
        let request = handle.shared.outbound.take().expect("pending");
        assert_eq!(request.kind, RequestKind::WriteData);
        assert_eq!(request.boosters.fan_booster, BoosterState::On);
        assert_eq!(request.boosters.cpu_turbo, CpuTurboBoostState::Off);
    }

    #[test]
    fn without_daemon_the_session_keeps_retrying() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = UiSession::start(fast_config(dir.path())).expect("start");
        std::thread::sleep(Duration::from_millis(50));
        assert!(session.is_running());
        assert_eq!(session.handle().last_known().connection, ConnectionState::NoConnection);
    }

    #[test]
    fn session_follows_the_daemon_and_applies_user_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut image = vec![0u8; ec_io::consts::REGISTER_FILE_SIZE];
        image[0x68] = 52;
        image[0xD4] = 13;
        image[0xEF] = 0x80 + 60;
        let image_path = dir.path().join("image.bin");
        std::fs::write(&image_path, image).expect("image");
        let mut service = DaemonService::new(DaemonConfig {
            variant: Some(Variant::IntelGen10),
            register_image: Some(image_path),
            cadence: FAST,
            ..DaemonConfig::dry_run(dir.path())
        })
        .expect("daemon");
        let daemon = Runner::spawn("test-daemon", move |stop| service.serve(&stop)).expect("spawn");

        let session = UiSession::start(fast_config(dir.path())).expect("start");
        let handle = session.handle();
        let healthy = wait_for(&handle, |s| {
            s.connection == ConnectionState::Healthy
                && s.info.as_ref().is_some_and(|i| i.info.cpu.temperature == 52)
        });
        assert_eq!(healthy.connection, ConnectionState::Healthy);

        handle.merge_request(|r| r.boosters.fan_booster = BoosterState::On);
        let boosted = wait_for(&handle, |s| {
            s.info
                .as_ref()
                .is_some_and(|i| i.boosters.fan_booster == BoosterState::On)
        });
        assert_eq!(
            boosted.info.map(|i| i.boosters.fan_booster),
            Some(BoosterState::On)
        );

        drop(session);
        assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
    }

    #[test]
    fn game_mode_can_be_toggled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = UiSession::start(fast_config(dir.path())).expect("start");
        session.set_game_mode(true).expect("on");
        assert!(session.is_game_mode());
        session.set_game_mode(false).expect("off");
        assert!(!session.is_game_mode());
    }
}
