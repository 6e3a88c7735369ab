use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use msi_fanctl::ec_io::consts::{DRY_RUN_FILE, REGISTER_FILE_SIZE};
use msi_fanctl::fanctl::{
    ClientConfig, ConnectionState, DaemonConfig, DaemonService, Runner, ServiceError,
    SessionConfig, UiClient, UiHandle, UiSession, UiSnapshot,
};
use msi_fanctl::fanctl_device::Variant;
use msi_fanctl::fanctl_proto::{BoosterState, ChannelConfig, RequestFromUi};

const FAST: Duration = Duration::from_millis(10);
const BOOSTER_REGISTER: usize = 0x98;

fn write_image(dir: &Path, name: &str, edit: impl FnOnce(&mut [u8])) -> PathBuf {
    let mut image = vec![0u8; REGISTER_FILE_SIZE];
    // Auto fan mode, charge limit at 80%.
    image[0xD4] = 13;
    image[0xEF] = 0x80 + 80;
    edit(&mut image);
    let path = dir.join(name);
    fs::write(&path, image).expect("image");
    path
}

fn start_daemon(dir: &Path, image: PathBuf) -> Runner<Result<(), ServiceError>> {
    let mut service = DaemonService::new(DaemonConfig {
        variant: Some(Variant::IntelGen10),
        register_image: Some(image),
        cadence: FAST,
        ..DaemonConfig::dry_run(dir)
    })
    .expect("daemon");
    Runner::spawn("it-daemon", move |stop| service.serve(&stop)).expect("spawn")
}

fn channel(dir: &Path) -> ChannelConfig {
    ChannelConfig {
        shm_dir: dir.to_path_buf(),
        ..ChannelConfig::default()
    }
}

fn client(dir: &Path) -> UiClient {
    UiClient::connect(ClientConfig {
        channel: channel(dir),
        service_delay: FAST,
        answer_timeout: Duration::from_secs(2),
    })
    .expect("connect")
}

fn register(dir: &Path, offset: usize) -> u8 {
    fs::read(dir.join(DRY_RUN_FILE)).expect("register file")[offset]
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

fn boost(client: &mut UiClient) {
    let mut request = RequestFromUi::default();
    request.boosters.fan_booster = BoosterState::On;
    assert!(client.apply(request).expect("apply"));
    assert_eq!(client.last_known().boosters.fan_booster, BoosterState::On);
}

#[test]
fn restart_restores_to_first_start_state() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first = write_image(dir.path(), "first.bin", |r| r[BOOSTER_REGISTER] = 0x02);
    let daemon = start_daemon(dir.path(), first);
    boost(&mut client(dir.path()));
    assert_eq!(register(dir.path(), BOOSTER_REGISTER), 0x82);
    daemon.stop_flag().stop();
    assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
    assert_eq!(register(dir.path(), BOOSTER_REGISTER), 0x02);

    // A second start sees different registers but keeps the first backup.
    let second = write_image(dir.path(), "second.bin", |r| r[BOOSTER_REGISTER] = 0x40);
    let daemon = start_daemon(dir.path(), second);
    boost(&mut client(dir.path()));
    assert_eq!(register(dir.path(), BOOSTER_REGISTER), 0xC0);
    daemon.stop_flag().stop();
    assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
    assert_eq!(register(dir.path(), BOOSTER_REGISTER), 0x02);
}

#[test]
fn game_mode_boosts_a_hot_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), "hot.bin", |r| {
        r[0x68] = 95;
        r[0x80] = 85;
    });
    let daemon = start_daemon(dir.path(), image);

    let mut config = SessionConfig {
        busy_delay: FAST,
        idle_delay: FAST,
        reconnect_delay: FAST,
        game_mode_delay: FAST,
        ..SessionConfig::default()
    };
    config.client = ClientConfig {
        channel: channel(dir.path()),
        service_delay: FAST,
        answer_timeout: Duration::from_millis(500),
    };
    let mut session = UiSession::start(config).expect("session");
    session.set_game_mode(true).expect("game mode");
    let handle = session.handle();

    let boosted = wait_for(&handle, |s| {
        s.connection == ConnectionState::Healthy
            && s.info
                .as_ref()
                .is_some_and(|i| i.boosters.fan_booster == BoosterState::On)
    });
    assert_eq!(
        boosted.info.map(|i| i.boosters.fan_booster),
        Some(BoosterState::On)
    );
    assert!(register(dir.path(), BOOSTER_REGISTER) & 0x80 != 0);

    drop(session);
    daemon.stop_flag().stop();
    assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
}

#[test]
fn stopped_daemon_removes_its_channel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = write_image(dir.path(), "idle.bin", |r| r[0x68] = 40);
    let daemon = start_daemon(dir.path(), image);
    let mut ui = client(dir.path());
    assert!(ui.refresh().expect("refresh"));
    assert_eq!(ui.last_known().info.cpu.temperature, 40);

    daemon.stop_flag().stop();
    assert_eq!(daemon.join().map(|r| r.is_ok()), Some(true));
    assert!(UiClient::connect(ClientConfig {
        channel: channel(dir.path()),
        ..ClientConfig::default()
    })
    .is_err());
}
