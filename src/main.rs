use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use vglitch_orchestrator::{GlitchConfig, Plan, SimTrace, run, simulate_glitch};
use vglitch_regs::host::{HostClient, ReadBack, parse_assignment};
use vglitch_regs::{Direction, RegisterLayout};

/// Voltage-glitch controller tools
#[derive(Parser)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
struct Cli {
    /// Controller config (TOML); built-in defaults when omitted
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Serial device, overrides `serial.port`
    #[arg(long, global = true)]
    port: Option<String>,
    /// Baud rate, overrides `serial.baud_rate`
    #[arg(long, global = true)]
    baud: Option<u32>,
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the register layout
    List {
        #[arg(long)]
        json: bool,
    },
    /// Read the controller's registers over the serial link
    Read {
        #[arg(long)]
        json: bool,
    },
    /// Write inbound registers; fields not named keep the controller's
    /// current value (raw framing: written as 0)
    Write {
        /// e.g. `start_glitch=1 glitch_delay=0x30 offset=-4`
        #[arg(value_name = "NAME=VALUE", required = true)]
        assignments: Vec<String>,
    },
    /// Run the controller, serving its registers on the configured port
    Run {
        /// Stop after this many ticks, 0 runs until Ctrl+C
        #[arg(long, default_value_t = 0)]
        ticks: u64,
    },
    /// Run one glitch cycle on simulated pins
    Simulate {
        /// Glitch length in ticks
        #[arg(long)]
        delay: u64,
        /// Holdoff in ticks, overrides `controller.hold_ticks`
        #[arg(long)]
        hold: Option<u32>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => GlitchConfig::from_file(&path.display().to_string())?,
        None => GlitchConfig::default(),
    };
    if let Some(port) = cli.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Commands::Simulate {
        hold: Some(hold), ..
    } = cli.command
    {
        config.controller.hold_ticks = hold;
    }
    let plan = config.plan().context("invalid configuration")?;

    match cli.command {
        Commands::List { json } => list(&plan.layout, json)?,
        Commands::Read { json } => {
            let readback = connect(&plan)?.read_regs()?;
            print_readback(&readback, &plan.layout, json)?;
        }
        Commands::Write { assignments } => {
            let updates = assignments
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<Result<Vec<_>, _>>()?;
            connect(&plan)?.write_regs(&updates)?;
            log::info!("Wrote {} register(s)", updates.len());
        }
        Commands::Run { ticks } => {
            let stop = stop_on_signal()?;
            let report = run(&plan, &stop, ticks)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Simulate { delay, json, .. } => {
            let trace = simulate_glitch(&plan, delay)?;
            print_trace(&trace, &plan, json)?;
        }
    }

    Ok(())
}

fn connect(plan: &Plan) -> Result<HostClient> {
    let Some(link) = &plan.link else {
        bail!("no serial port configured, pass --port or set serial.port");
    };
    let client = HostClient::connect(
        &link.port,
        plan.backend.baud_rate,
        Arc::clone(&plan.layout),
        plan.backend.framing,
    )?;
    Ok(client)
}

/// Flag raised by Ctrl+C or SIGTERM, watched from a signal thread.
fn stop_on_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("signal runtime")?;
    let flag = Arc::clone(&stop);
    std::thread::spawn(move || {
        rt.block_on(async {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            let sigterm = async {
                use tokio::signal::unix::{SignalKind, signal};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(err) => {
                        log::warn!("failed to install SIGTERM handler: {err}");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let sigterm = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm => {},
            }
        });
        log::info!("Shutdown signal received, stopping the engine");
        flag.store(true, Ordering::Relaxed);
    });
    Ok(stop)
}

#[derive(Serialize)]
struct LayoutSummary<'a> {
    in_bytes: usize,
    out_bytes: usize,
    fields: &'a [vglitch_regs::FieldSpec],
}

fn list(layout: &RegisterLayout, json: bool) -> Result<()> {
    if json {
        let summary = LayoutSummary {
            in_bytes: layout.bytes(Direction::In),
            out_bytes: layout.bytes(Direction::Out),
            fields: layout.fields(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!(
        "{:<20} {:>4}  {:<3}  {:<16}  {:>20}  {:>20}",
        "NAME", "BITS", "DIR", "TYPE", "MIN", "MAX"
    );
    for field in layout.fields() {
        println!(
            "{:<20} {:>4}  {:<3}  {:<16}  {:>20}  {:>20}",
            field.name,
            field.bits,
            field.direction,
            field.kind,
            field.min_int(),
            field.max_int()
        );
    }
    println!(
        "in: {} bytes, out: {} bytes",
        layout.bytes(Direction::In),
        layout.bytes(Direction::Out)
    );
    Ok(())
}

fn print_readback(readback: &ReadBack, layout: &RegisterLayout, json: bool) -> Result<()> {
    let out = readback.numbers(layout, Direction::Out);
    let inbound = readback
        .inbound
        .is_some()
        .then(|| readback.numbers(layout, Direction::In));
    if json {
        let to_map = |fields: &[(&str, i128)]| {
            fields
                .iter()
                .map(|&(name, value)| (name.to_string(), json_number(value)))
                .collect::<serde_json::Map<_, _>>()
        };
        let value = serde_json::json!({
            "out": to_map(&out),
            "in": inbound.as_deref().map(to_map),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    let raw = |name: &str, fields: &[(String, u64)]| {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map_or(0, |(_, v)| *v)
    };
    let print_rows = |rows: &[(&str, i128)], fields: &[(String, u64)]| {
        for &(name, value) in rows {
            let kind = layout.field(name).map(|(_, spec)| spec.kind);
            let kind = kind.map(|k| k.to_string()).unwrap_or_default();
            println!("{name:<20} {kind:<16} {value:>20}  {:#x}", raw(name, fields));
        }
    };
    print_rows(&out, &readback.out);
    if let (Some(rows), Some(fields)) = (&inbound, &readback.inbound) {
        println!("-- inbound --");
        print_rows(rows, fields);
    }
    Ok(())
}

fn json_number(value: i128) -> serde_json::Value {
    match i64::try_from(value) {
        Ok(v) => v.into(),
        Err(_) => u64::try_from(value).map_or(serde_json::Value::Null, Into::into),
    }
}

#[derive(Serialize)]
struct TraceRow {
    tick: u64,
    from: String,
    to: String,
}

#[derive(Serialize)]
struct TraceSummary {
    events: Vec<TraceRow>,
    pulse_ticks: u64,
    total_ticks: u64,
    pulse_ns: u64,
}

fn print_trace(trace: &SimTrace, plan: &Plan, json: bool) -> Result<()> {
    let pulse = plan.clock.ticks_to_duration(trace.pulse_ticks);
    if json {
        let summary = TraceSummary {
            events: trace
                .events
                .iter()
                .map(|e| TraceRow {
                    tick: e.tick,
                    from: format!("{:?}", e.from),
                    to: format!("{:?}", e.to),
                })
                .collect(),
            pulse_ticks: trace.pulse_ticks,
            total_ticks: trace.total_ticks,
            pulse_ns: u64::try_from(pulse.as_nanos()).unwrap_or(u64::MAX),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for e in &trace.events {
        println!("tick {:>10}: {:?} -> {:?}", e.tick, e.from, e.to);
    }
    println!(
        "power cut for {} ticks ({pulse:?} at {} Hz), {} ticks total",
        trace.pulse_ticks, plan.clock.hz, trace.total_ticks
    );
    Ok(())
}
