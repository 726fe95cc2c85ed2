//! End-to-end: TOML config -> assembled controller -> register link over an
//! in-memory stream -> host session writing and reading registers while the
//! engine ticks on the test thread.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::DuplexStream;
use tokio::runtime::Runtime;
use vglitch_hal::traits::IoBackend;
use vglitch_orchestrator::{Assembly, GlitchConfig, assemble};
use vglitch_regs::host::HostSession;
use vglitch_regs::link::SerialLink;
use vglitch_regs::{Framing, RegisterFile};
use vglitch_runtime::{ControllerState, GlitchEngine};

fn wait_for_commit(file: &RegisterFile, version: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while file.inbound_version() == version {
        assert!(Instant::now() < deadline, "write never committed");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn value(fields: &[(String, u64)], name: &str) -> u64 {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| *v)
        .unwrap()
}

struct Rig {
    engine: GlitchEngine<Box<dyn IoBackend>>,
    file: Arc<RegisterFile>,
    link: SerialLink,
    session: HostSession<DuplexStream>,
}

fn start(toml: &str, push: Option<Duration>) -> Rig {
    let plan = GlitchConfig::from_toml(toml).unwrap().plan().unwrap();
    let Assembly {
        engine,
        backend,
        file,
    } = assemble(&plan).unwrap();
    let (device, host) = tokio::io::duplex(4096);
    let link = SerialLink::spawn(Runtime::new().unwrap(), device, backend, push);
    let session = HostSession::new(host, Arc::clone(&plan.layout), plan.backend.framing)
        .with_read_timeout(Duration::from_secs(2));
    Rig {
        engine,
        file,
        link,
        session,
    }
}

#[test]
fn delimited_host_drives_one_glitch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let toml = r#"
[serial]
framing = "delimited"

[controller]
hold_ticks = 5
"#;
    let Rig {
        mut engine,
        file,
        link,
        mut session,
    } = start(toml, None);
    let host_rt = Runtime::new().unwrap();

    let before = file.inbound_version();
    host_rt
        .block_on(session.write_regs(&[
            ("start_glitch".into(), 1),
            ("glitch_delay".into(), 3),
        ]))
        .unwrap();
    wait_for_commit(&file, before);

    let taken = engine
        .run_until(100, |c| c.glitch_count() == 1 && c.state() == ControllerState::Idle)
        .unwrap();
    // trigger tick + 4 glitching ticks + 5 holdoff ticks
    assert_eq!(taken, 10);

    host_rt
        .block_on(session.write_regs(&[("start_glitch".into(), 0)]))
        .unwrap();
    let readback = host_rt.block_on(session.read_regs()).unwrap();
    assert_eq!(value(&readback.out, "glitch_count"), 1);
    assert_eq!(value(&readback.out, "state"), 0);
    assert_eq!(value(&readback.out, "glitch_output"), 1);
    let inbound = readback.inbound.unwrap();
    assert_eq!(value(&inbound, "start_glitch"), 0);
    // untouched fields keep the last written value
    assert_eq!(value(&inbound, "glitch_delay"), 3);

    let backend = link.shutdown().unwrap();
    let stats = backend.diagnostics().snapshot();
    assert_eq!(stats.frames_committed, 2);
    // the partial write reads the committed values first
    assert_eq!(stats.read_requests, 2);
    assert_eq!(backend.config().framing, Framing::Delimited);
}

#[test]
fn raw_link_pushes_status() {
    let toml = "[controller]\nhold_ticks = 5\n";
    let Rig {
        mut engine,
        file,
        link,
        mut session,
    } = start(toml, Some(Duration::from_millis(50)));
    let host_rt = Runtime::new().unwrap();

    let before = file.inbound_version();
    host_rt
        .block_on(session.write_regs(&[
            ("start_glitch".into(), 1),
            ("glitch_delay".into(), 0x30),
        ]))
        .unwrap();
    wait_for_commit(&file, before);
    engine
        .run_until(1000, |c| c.state() == ControllerState::Holdoff)
        .unwrap();

    // pushes queued before the glitch come first
    let mut readback = host_rt.block_on(session.read_regs()).unwrap();
    for _ in 0..200 {
        if value(&readback.out, "state") == 2 {
            break;
        }
        readback = host_rt.block_on(session.read_regs()).unwrap();
    }
    assert!(readback.inbound.is_none());
    assert_eq!(readback.out.len(), 4);
    assert_eq!(value(&readback.out, "state"), 2);
    assert_eq!(value(&readback.out, "glitch_count"), 1);
    assert_eq!(value(&readback.out, "glitch_output"), 1);

    link.shutdown().unwrap();
}
