//! Glitch controller orchestrator: turns a TOML config into running parts.
//!
//! Reads the config, checks it into a [`Plan`], then builds the register
//! file, its serial backend, the trigger source and the tick engine.
//!
//! Supported I/O:
//! - `sim`: SimBackend pins, register access over the serial link (if a
//!   port is configured) or in-process only

pub mod config;

pub use config::{GlitchConfig, IoMode, LinkPlan, Plan, TriggerPlan};

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use vglitch_hal::sim::SimBackend;
use vglitch_hal::traits::IoBackend;
use vglitch_regs::diag::DiagSnapshot;
use vglitch_regs::link::SerialLink;
use vglitch_regs::{
    Direction, LayoutError, RegisterBackend, RegisterError, RegisterFile, RegisterValues,
};
use vglitch_runtime::counter::COUNTER_BITS;
use vglitch_runtime::{
    ControllerState, GlitchController, GlitchEngine, InputBankTrigger, RegisterTrigger,
    RuntimeError, TriggerSource,
};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("register link error: {0}")]
    Register(#[from] RegisterError),
    #[error("controller error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Create the pin backend for `mode`.
pub fn create_io_backend(mode: IoMode) -> Box<dyn IoBackend> {
    match mode {
        IoMode::Sim => Box::new(SimBackend::new()),
    }
}

/// Create the trigger source the plan selects, reading from `file` when it
/// is register driven.
pub fn create_trigger(
    plan: &Plan,
    file: &RegisterFile,
) -> Result<Box<dyn TriggerSource>, OrchestratorError> {
    let source: Box<dyn TriggerSource> = match &plan.trigger {
        TriggerPlan::Registers {
            trigger_field,
            threshold_field,
            active_low,
        } => Box::new(RegisterTrigger::new(
            file,
            trigger_field,
            threshold_field,
            *active_low,
        )?),
        TriggerPlan::InputBank { active_low } => Box::new(InputBankTrigger::new(
            plan.pins.trigger.clone(),
            plan.pins.threshold_bank.clone(),
            *active_low,
        )?),
    };
    Ok(source)
}

/// Everything one controller instance consists of.
pub struct Assembly {
    pub engine: GlitchEngine<Box<dyn IoBackend>>,
    pub backend: RegisterBackend,
    pub file: Arc<RegisterFile>,
}

/// Build the register file, backend and engine for `plan`.
pub fn assemble(plan: &Plan) -> Result<Assembly, OrchestratorError> {
    for warning in plan.warnings() {
        log::warn!("{warning}");
    }
    let file = Arc::new(RegisterFile::new(Arc::clone(&plan.layout)));
    let backend = RegisterBackend::configure(plan.backend, Arc::clone(&file))?;
    let source = create_trigger(plan, &file)?;
    let engine = GlitchEngine::new(
        create_io_backend(plan.io),
        GlitchController::new(plan.controller)?,
        source,
        plan.pins.clone(),
        plan.clock,
    )?
    .with_status(Arc::clone(&file));
    log::info!(
        "Assembled controller: {} in / {} out bytes, {:?} framing, hold {} ticks",
        plan.backend.in_width_bytes,
        plan.backend.out_width_bytes,
        plan.backend.framing,
        plan.controller.hold_ticks
    );
    Ok(Assembly {
        engine,
        backend,
        file,
    })
}

/// Serve `backend` on the plan's serial port, if it has one.
pub fn open_link(
    plan: &Plan,
    backend: RegisterBackend,
) -> Result<Option<SerialLink>, OrchestratorError> {
    match &plan.link {
        Some(link) => Ok(Some(SerialLink::open(
            &link.port,
            backend,
            link.push_interval,
        )?)),
        None => {
            log::info!("No serial port configured, registers are in-process only");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub glitch_count: u32,
    pub link: Option<DiagSnapshot>,
}

/// Assemble, serve the serial link and run against the wall clock until
/// `stop` is set or `max_ticks` (0 = unbounded) have run.
pub fn run(plan: &Plan, stop: &AtomicBool, max_ticks: u64) -> Result<RunReport, OrchestratorError> {
    let Assembly {
        mut engine,
        backend,
        file: _,
    } = assemble(plan)?;
    let diag = backend.diagnostics();
    let link = open_link(plan, backend)?;

    let ticks = engine.run_realtime(stop, max_ticks);
    let link_stats = match link {
        Some(link) => {
            if link.is_finished() {
                log::warn!("Register link ended before the engine stopped");
            }
            link.shutdown()?;
            Some(diag.snapshot())
        }
        None => None,
    };
    Ok(RunReport {
        ticks,
        glitch_count: engine.controller.glitch_count(),
        link: link_stats,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub tick: u64,
    pub from: ControllerState,
    pub to: ControllerState,
}

/// One glitch cycle run without a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTrace {
    pub events: Vec<TraceEvent>,
    /// Ticks with the target's power cut.
    pub pulse_ticks: u64,
    pub total_ticks: u64,
}

/// Arm the controller with `delay` through its inbound registers and run
/// until it is back in Idle.
pub fn simulate_glitch(plan: &Plan, delay: u64) -> Result<SimTrace, OrchestratorError> {
    let TriggerPlan::Registers {
        trigger_field,
        threshold_field,
        active_low,
    } = &plan.trigger
    else {
        return Err(OrchestratorError::ConfigError(
            "simulation needs a register trigger".into(),
        ));
    };
    if delay >> COUNTER_BITS != 0 {
        return Err(OrchestratorError::ConfigError(format!(
            "delay {delay} does not fit the {COUNTER_BITS}-bit tick counter"
        )));
    }

    let Assembly { mut engine, file, .. } = assemble(plan)?;
    let layout = Arc::clone(file.layout());
    let field = |name: &str| {
        layout
            .field(name)
            .map(|(id, spec)| (id, spec.max_value()))
            .ok_or_else(|| OrchestratorError::ConfigError(format!("unknown register {name}")))
    };
    let (trigger_id, _) = field(trigger_field.as_str())?;
    let (threshold_id, threshold_max) = field(threshold_field.as_str())?;
    if delay > threshold_max {
        return Err(OrchestratorError::ConfigError(format!(
            "delay {delay} does not fit register {threshold_field}"
        )));
    }

    let mut values = RegisterValues::zeroed(&layout, Direction::In);
    values.set(trigger_id, u64::from(!*active_low));
    values.set(threshold_id, delay);
    file.commit_inbound(values);

    // trigger tick, D + 1 glitching ticks, then the holdoff
    let limit = 2 + delay + u64::from(plan.controller.hold_ticks);
    let mut trace = SimTrace {
        events: Vec::new(),
        pulse_ticks: 0,
        total_ticks: 0,
    };
    for _ in 0..limit {
        let tick = engine.tick_count;
        let transition = engine.step();
        if !engine.controller.outputs().glitch_output {
            trace.pulse_ticks += 1;
        }
        if let Some(t) = transition {
            log::debug!("tick {tick}: {:?} -> {:?}", t.from, t.to);
            trace.events.push(TraceEvent {
                tick,
                from: t.from,
                to: t.to,
            });
            if t.to == ControllerState::Idle {
                break;
            }
        }
    }
    trace.total_ticks = engine.tick_count;
    Ok(trace)
}
