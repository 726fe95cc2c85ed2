//! Controller driven through the byte-level register path: the host's bytes
//! go through a `RegisterBackend`, the controller samples the committed file.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use vglitch_hal::sim::SimBackend;
use vglitch_regs::{BackendConfig, Direction, RegisterBackend, RegisterFile, RegisterLayout};
use vglitch_runtime::{
    ControllerConfig, ControllerState, GlitchController, RegisterTrigger, TriggerSource,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `start_glitch` and a 31-bit delay in a 4-byte inbound buffer.
fn four_byte_backend() -> RegisterBackend {
    let layout = RegisterLayout::parse(&["start_glitch=1", "glitch_delay=31", "indicator=2:out"])
        .unwrap();
    let file = Arc::new(RegisterFile::new(Arc::new(layout)));
    RegisterBackend::configure(BackendConfig::new(115_200, 4, 1), file).unwrap()
}

fn frame(backend: &RegisterBackend, start: u64, delay: u64) -> Vec<u8> {
    backend.file().layout().pack(Direction::In, &[start, delay])
}

fn send(backend: &mut RegisterBackend, bytes: &[u8]) {
    for &b in bytes {
        backend.feed(b);
    }
}

struct Rig {
    backend: RegisterBackend,
    controller: GlitchController,
    source: RegisterTrigger,
    io: SimBackend,
    tick: u64,
}

impl Rig {
    fn new(config: ControllerConfig) -> Self {
        let backend = four_byte_backend();
        let source =
            RegisterTrigger::new(backend.file(), "start_glitch", "glitch_delay", false).unwrap();
        Self {
            backend,
            controller: GlitchController::new(config).unwrap(),
            source,
            io: SimBackend::new(),
            tick: 0,
        }
    }

    fn write(&mut self, start: u64, delay: u64) {
        let bytes = frame(&self.backend, start, delay);
        send(&mut self.backend, &bytes);
    }

    /// Run one tick and return the state it leaves the controller in.
    fn tick(&mut self) -> ControllerState {
        let sample = self.source.sample(&self.io);
        self.controller.tick(sample);
        self.tick += 1;
        self.controller.state()
    }

    /// Tick until the state changes; returns the index of the tick that
    /// changed it.
    fn until_change(&mut self) -> u64 {
        let from = self.controller.state();
        while self.tick() == from {}
        self.tick - 1
    }
}

#[test]
fn documented_scenario_with_default_hold() {
    init_logger();
    let mut rig = Rig::new(ControllerConfig::default());
    rig.write(1, 5);

    // tick 0 sees the trigger
    assert_eq!(rig.tick(), ControllerState::Glitching);
    // the trigger level no longer matters once glitching
    rig.write(0, 5);

    assert_eq!(rig.until_change(), 6);
    assert_eq!(rig.controller.state(), ControllerState::Holdoff);
    assert_eq!(rig.until_change(), 10_000_006);
    assert_eq!(rig.controller.state(), ControllerState::Idle);
}

#[test]
fn zero_delay_glitches_for_one_tick() {
    let mut rig = Rig::new(ControllerConfig { hold_ticks: 3 });
    rig.write(1, 0);
    assert_eq!(rig.tick(), ControllerState::Glitching);
    assert_eq!(rig.tick(), ControllerState::Holdoff);
}

#[test]
fn delay_rewritten_over_the_wire_mid_glitch() {
    let mut rig = Rig::new(ControllerConfig { hold_ticks: 3 });
    rig.write(1, 1_000);
    rig.tick();
    for _ in 0..50 {
        assert_eq!(rig.tick(), ControllerState::Glitching);
    }
    assert_eq!(rig.controller.counter(), 50);

    // a half-delivered frame changes nothing
    let bytes = frame(&rig.backend, 1, 10);
    send(&mut rig.backend, &bytes[..2]);
    assert_eq!(rig.tick(), ControllerState::Glitching);
    assert_eq!(rig.controller.counter(), 51);

    // once complete, the very next comparison uses it
    send(&mut rig.backend, &bytes[2..]);
    assert_eq!(rig.tick(), ControllerState::Holdoff);
}

#[test]
fn counter_never_skips_while_registers_are_rewritten() {
    let mut backend = four_byte_backend();
    let file = Arc::clone(backend.file());
    let mut source = RegisterTrigger::new(&file, "start_glitch", "glitch_delay", false).unwrap();
    let mut controller = GlitchController::new(ControllerConfig { hold_ticks: 3 }).unwrap();
    let io = SimBackend::new();

    let bytes = frame(&backend, 1, 0x7FFF_FFFF);
    send(&mut backend, &bytes);
    controller.tick(source.sample(&io));
    assert_eq!(controller.state(), ControllerState::Glitching);

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut delay = 0x7FFF_0000u64;
            while !done.load(Ordering::Relaxed) {
                let bytes = frame(&backend, 1, delay);
                send(&mut backend, &bytes);
                delay = if delay == 0x7FFF_FFFF { 0x7FFF_0000 } else { delay + 1 };
            }
            backend
        })
    };

    let mut last = controller.counter();
    for _ in 0..200_000 {
        controller.tick(source.sample(&io));
        assert_eq!(controller.state(), ControllerState::Glitching);
        assert_eq!(controller.counter(), last + 1);
        last = controller.counter();
    }
    done.store(true, Ordering::Relaxed);
    let backend = writer.join().unwrap();
    assert!(backend.diagnostics().snapshot().frames_committed > 1);
}
