//! End-to-end tests over real loopback sockets.
//!
//! Robots are told apart by source address, so each simulated robot binds
//! its client sockets to its own 127.0.0.x address before connecting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use fleet_connector::config::RobotEntry;
use fleet_connector::operator_console::run_console;
use fleet_connector::{Coordinator, CoordinatorConfig};
use fleet_protocol::{FleetError, OperatingState, RobotIdentity, StateSnapshot, TaskRef};
use fleet_state::{liveness, FleetRegistry};

const ROBOT_1: &str = "127.0.0.2";
const ROBOT_2: &str = "127.0.0.3";
const ROBOT_3: &str = "127.0.0.4";

struct Harness {
    coordinator: Coordinator,
    uplink: SocketAddr,
    downlink: SocketAddr,
    liveness: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    async fn start() -> Self {
        let mut config = CoordinatorConfig::default();
        config.network.bind_addr = "127.0.0.1".into();
        config.network.port = 0;
        config.network.discovery = false;
        config.operator.enabled = false;
        config.fleet.robots = vec![
            RobotEntry { id: 1, ip: ROBOT_1.parse().unwrap() },
            RobotEntry { id: 2, ip: ROBOT_2.parse().unwrap() },
            RobotEntry { id: 3, ip: ROBOT_3.parse().unwrap() },
        ];

        let coordinator = Coordinator::new(config).unwrap();
        let listeners = coordinator.bind().await.unwrap();
        let (uplink, downlink, liveness) = listeners.local_addrs().unwrap();
        let tasks = coordinator.start(listeners).unwrap();
        Self {
            coordinator,
            uplink,
            downlink,
            liveness,
            tasks,
        }
    }

    fn registry(&self) -> Arc<FleetRegistry> {
        self.coordinator.registry()
    }

    async fn stop(self) {
        self.coordinator.shutdown();
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}

fn id(ip: &str) -> RobotIdentity {
    ip.parse().unwrap()
}

async fn connect_from(ip: &str, addr: SocketAddr) -> TcpStream {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(format!("{ip}:0").parse().unwrap()).unwrap();
    socket.connect(addr).await.unwrap()
}

/// Poll the registry until `check` holds, failing after two seconds.
async fn wait_until<F>(registry: &FleetRegistry, mut check: F)
where
    F: FnMut(&[fleet_state::RobotView]) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if check(&registry.snapshot().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached the expected state");
}

fn downlink_count(views: &[fleet_state::RobotView]) -> usize {
    views.iter().filter(|v| v.has_downlink).count()
}

async fn read_frame(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no frame arrived")
        .unwrap();
    line
}

#[tokio::test]
async fn test_broadcast_reaches_every_robot_despite_one_failure() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut r1 = BufReader::new(connect_from(ROBOT_1, harness.downlink).await);
    let mut r2 = BufReader::new(connect_from(ROBOT_2, harness.downlink).await);
    // Robot 3 is tracked through its uplink but has no downlink.
    let _r3_uplink = connect_from(ROBOT_3, harness.uplink).await;

    wait_until(&registry, |views| views.len() == 3 && downlink_count(views) == 2).await;

    let report = harness
        .coordinator
        .router()
        .route_text("-1", "/task 5")
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![id(ROBOT_1), id(ROBOT_2)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, id(ROBOT_3));
    assert!(matches!(report.failed[0].1, FleetError::SendFailure { .. }));

    assert_eq!(read_frame(&mut r1).await, "/task 5\n");
    assert_eq!(read_frame(&mut r2).await, "/task 5\n");

    harness.stop().await;
}

#[tokio::test]
async fn test_single_target_and_unknown_target() {
    let harness = Harness::start().await;
    let registry = harness.registry();
    let router = harness.coordinator.router();

    let mut r2 = BufReader::new(connect_from(ROBOT_2, harness.downlink).await);
    wait_until(&registry, |views| downlink_count(views) == 1).await;

    let report = router.route_text("2", "/go_power").await.unwrap();
    assert_eq!(report.delivered, vec![id(ROBOT_2)]);
    assert_eq!(read_frame(&mut r2).await, "/go_power\n");

    // Configured but never connected.
    let err = router.route_text("1", "/task 2").await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownTarget(_)));
    // Not configured at all.
    let err = router.route_text("7", "/task 2").await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownTarget(_)));
    let err = router.route_text("2", "/").await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidCommand(_)));

    harness.stop().await;
}

#[tokio::test]
async fn test_attention_report_transfers_work_over_the_wire() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut idle_down = BufReader::new(connect_from(ROBOT_1, harness.downlink).await);
    let mut busy_down = BufReader::new(connect_from(ROBOT_2, harness.downlink).await);
    let mut idle_up = connect_from(ROBOT_1, harness.uplink).await;
    let mut busy_up = connect_from(ROBOT_2, harness.uplink).await;

    idle_up
        .write_all(b"/info {\"current_state\":\"IDLE\",\"task_queue\":[],\"power_level\":\"FULL\"}\n")
        .await
        .unwrap();
    wait_until(&registry, |views| {
        downlink_count(views) == 2
            && views
                .iter()
                .any(|v| v.identity == id(ROBOT_1) && v.operating_state == OperatingState::Idle)
    })
    .await;

    let report = serde_json::json!({
        "current_point": 14,
        "current_state": "TASK",
        "last_state": "CRUISE",
        "current_path": "14-15-16",
        "cruise_index": 2,
        "task_queue": [5, 6],
        "power_level": "ATTENTION",
    });
    busy_up
        .write_all(format!("/info {report}\n").as_bytes())
        .await
        .unwrap();

    assert_eq!(read_frame(&mut busy_down).await, "/go_power\n");

    let adopt = read_frame(&mut idle_down).await;
    let payload = adopt
        .strip_prefix("/info ")
        .expect("adopt-state frame")
        .trim_end();
    let snapshot: StateSnapshot = serde_json::from_str(payload).unwrap();
    assert_eq!(snapshot.current_path, "14-15-16");
    assert_eq!(snapshot.cruise_index, 2);
    assert_eq!(snapshot.task_queue, vec![TaskRef::Number(5), TaskRef::Number(6)]);

    wait_until(&registry, |views| {
        views
            .iter()
            .any(|v| v.identity == id(ROBOT_2) && v.operating_state == OperatingState::Charging)
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_liveness_token_keeps_robot_tracked() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut up = connect_from(ROBOT_3, harness.uplink).await;
    up.write_all(b"/info {\"current_state\":\"CRUISE\",\"power_level\":\"ENOUGH\"}\n")
        .await
        .unwrap();
    wait_until(&registry, |views| {
        views
            .iter()
            .any(|v| v.identity == id(ROBOT_3) && v.operating_state == OperatingState::Cruising)
    })
    .await;

    let before = registry.snapshot().await[0].last_heartbeat_at;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut live = connect_from(ROBOT_3, harness.liveness).await;
    live.write_all(b"ABCDEF").await.unwrap();
    wait_until(&registry, |views| views[0].last_heartbeat_at > before).await;

    // Sixteen seconds of silence from here is a loss of contact.
    let later = Instant::now() + Duration::from_secs(16);
    let lost = liveness::sweep(&registry, Duration::from_secs(15), later).await;
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].previous_state, OperatingState::Cruising);
    assert_eq!(registry.snapshot().await[0].operating_state, OperatingState::Unknown);

    // The next report brings it back.
    up.write_all(b"/info {\"current_state\":\"IDLE\"}\n").await.unwrap();
    wait_until(&registry, |views| views[0].operating_state == OperatingState::Idle).await;
    assert_eq!(registry.len().await, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_invalid_utf8_line_does_not_drop_the_uplink() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut up = connect_from(ROBOT_2, harness.uplink).await;
    up.write_all(b"/info {\"current_state\":\"\xff\xfe\"}\n").await.unwrap();
    up.write_all(b"/info {\"current_state\":\"CRUISE\"}\n").await.unwrap();

    // The valid report on the same socket still lands.
    wait_until(&registry, |views| {
        views
            .iter()
            .any(|v| v.identity == id(ROBOT_2) && v.operating_state == OperatingState::Cruising)
    })
    .await;

    up.write_all(b"\x80\n/info {\"current_state\":\"IDLE\"}\n").await.unwrap();
    wait_until(&registry, |views| {
        views
            .iter()
            .any(|v| v.identity == id(ROBOT_2) && v.operating_state == OperatingState::Idle)
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_reconnected_downlink_replaces_the_old_one() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut first = connect_from(ROBOT_1, harness.downlink).await;
    wait_until(&registry, |views| downlink_count(views) == 1).await;

    let mut second = BufReader::new(connect_from(ROBOT_1, harness.downlink).await);

    // The superseded worker exits and closes its socket.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(2), first.read(&mut buf))
        .await
        .expect("old downlink was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let report = harness
        .coordinator
        .router()
        .route_text("1", "/task 3")
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![id(ROBOT_1)]);
    assert_eq!(read_frame(&mut second).await, "/task 3\n");
    assert_eq!(registry.len().await, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_operator_console_routes_lines_and_shortcuts() {
    let harness = Harness::start().await;
    let registry = harness.registry();

    let mut r1 = BufReader::new(connect_from(ROBOT_1, harness.downlink).await);
    wait_until(&registry, |views| downlink_count(views) == 1).await;

    let input: &[u8] = b"1 /task 2\n.\nbogus\n3 /task 4\n";
    let mut output = Vec::new();
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let shortcuts = harness.coordinator.config().operator.shortcuts.clone();
    run_console(
        BufReader::new(input),
        &mut output,
        &harness.coordinator.router(),
        &shortcuts,
        shutdown,
    )
    .await
    .unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains(&format!("ok {ROBOT_1} /task 2")), "{output}");
    assert!(output.contains(&format!("ok {ROBOT_1} /task 5")), "{output}");
    assert!(output.contains("unrecognised: bogus"), "{output}");
    assert!(output.contains("failed 3 /task 4"), "{output}");

    assert_eq!(read_frame(&mut r1).await, "/task 2\n");
    assert_eq!(read_frame(&mut r1).await, "/task 5\n");

    harness.stop().await;
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coordinator.toml");
    std::fs::write(
        &path,
        r#"
[network]
port = 7100
discovery = false

[liveness]
timeout_secs = 10
sweep_interval_secs = 1

[[fleet.robots]]
id = 1
ip = "10.1.0.11"

[[fleet.robots]]
id = 2
ip = "10.1.0.12"

[handoff]
fallback_robot = 2

[operator]
enabled = false
"#,
    )
    .unwrap();

    let config = CoordinatorConfig::load(&path).unwrap();
    assert_eq!(config.network.downlink_addr(), "0.0.0.0:7101");
    assert_eq!(config.liveness.timeout(), Duration::from_secs(10));
    assert!(!config.operator.enabled);

    let coordinator = Coordinator::new(config).unwrap();
    assert_eq!(
        coordinator.handoff().policy().fallback,
        Some("10.1.0.12".parse().unwrap())
    );
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[handoff]\nfallback_robot = 4\n").unwrap();
    assert!(matches!(
        CoordinatorConfig::load(&path),
        Err(FleetError::Config(_))
    ));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(
        CoordinatorConfig::load(&missing),
        Err(FleetError::Config(_))
    ));
}

#[test]
fn test_example_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/coordinator.example.toml");
    let config = CoordinatorConfig::load(&path).unwrap();
    assert_eq!(config, {
        let mut expected = CoordinatorConfig::default();
        expected.network.advertise_ip = "192.168.203.1".into();
        expected
    });
}
