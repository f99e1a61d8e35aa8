//! frame-bridge CLI entry point.
//!
//! Runs a frame-driven WebAssembly guest headlessly: the entry point runs
//! once, then the guest is fed animation frames and scripted keyboard input
//! until a frame limit, idleness, or Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_bridge_common::ConfigFile;
use frame_bridge_host::imports::{self, IMPORTS};
use frame_bridge_host::{HostSession, SessionPlan, SessionReport};

/// Run a frame-driven WebAssembly guest headlessly.
#[derive(Debug, Parser)]
#[command(name = "frame-bridge", version, about)]
struct Cli {
    /// Guest module (`.wasm`, `.wat` or precompiled `.cwasm`).
    module: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long, env = "FRAME_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many frame ticks.
    #[arg(long)]
    frames: Option<u64>,

    /// Frame clock rate in Hz.
    #[arg(long)]
    fps: Option<u32>,

    /// Write the final path as an SVG document.
    #[arg(long)]
    svg_out: Option<PathBuf>,

    /// Write a JSON session report.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Link WASI preview1 for `wasm32-wasip1` guests.
    #[arg(long)]
    wasi: bool,

    /// Print the host import table and the module's imports, then exit.
    #[arg(long)]
    list_imports: bool,

    /// Write the compiled module as a `.cwasm` artifact, then exit.
    #[arg(long, value_name = "OUT")]
    precompile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Guest output owns stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,frame_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConfigFile::default(),
    };
    if let Some(fps) = cli.fps {
        file.runtime.host.frame_rate_hz = fps;
    }
    if cli.wasi {
        file.runtime.host.wasi = true;
    }

    let Some(module_path) = cli
        .module
        .clone()
        .or_else(|| file.session.module.as_ref().map(PathBuf::from))
    else {
        bail!("No guest module given. Pass MODULE or set session.module in the config file");
    };

    let session = HostSession::new(file.runtime.clone()).context("Failed to create runtime")?;
    let module = session
        .load_module(&module_path)
        .with_context(|| format!("Failed to compile {}", module_path.display()))?;

    info!(
        module = %module_path.display(),
        content_hash = %module.content_hash(),
        "Guest module loaded"
    );

    if cli.list_imports {
        print_imports(&module.imports(), session.config().host.wasi);
        return Ok(());
    }

    if let Some(out) = &cli.precompile {
        module
            .save_precompiled(out)
            .with_context(|| format!("Failed to precompile to {}", out.display()))?;
        return Ok(());
    }

    let mut plan = SessionPlan::from_config_file(&file);
    if let Some(frames) = cli.frames {
        plan.frames = Some(frames);
    }
    if let Some(svg_out) = cli.svg_out {
        plan.svg_out = Some(svg_out);
    }

    let report = session.run(&module, &plan).await?;

    let report_out = cli
        .report
        .or_else(|| file.session.report_out.as_ref().map(PathBuf::from));
    if let Some(path) = report_out {
        let body = serde_json::to_string_pretty(&report_json(&report))?;
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Session report written");
    }

    Ok(())
}

fn print_imports(module_imports: &[(String, String)], wasi: bool) {
    println!("Host imports:");
    for entry in IMPORTS {
        match entry.alias {
            Some(alias) => println!("  {entry}  (alias: {alias})  {}", entry.summary),
            None => println!("  {entry}  {}", entry.summary),
        }
    }
    if wasi {
        println!("  {}::*  (WASI preview1)", imports::WASI_MODULE);
    }

    println!("Module imports:");
    let missing = imports::unresolved(module_imports, wasi);
    for import in module_imports {
        let status = if missing.contains(&import) {
            "missing"
        } else {
            "ok"
        };
        println!("  {}::{}  {status}", import.0, import.1);
    }
}

fn report_json(report: &SessionReport) -> serde_json::Value {
    let metrics = &report.metrics;
    json!({
        "session_id": report.session_id,
        "entry_point": report.entry_point,
        "stop_reason": report.stop_reason.to_string(),
        "frames": report.frames,
        "live_loops": report.live_loops,
        "metrics": {
            "guest_calls": metrics.guest_calls,
            "frames_dispatched": metrics.frames_dispatched,
            "key_events_dispatched": metrics.key_events_dispatched,
            "suppressed_deliveries": metrics.suppressed_deliveries,
            "fuel_consumed": metrics.fuel_consumed,
            "duration_ms": metrics.duration.map(|d| d.as_secs_f64() * 1e3),
        },
        "random_bytes": report.random_bytes,
        "console": report.console,
        "path": report.path,
    })
}
