use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use expunge::devices::DeviceCatalog;
use expunge::engine::{EraseEngine, JobOutcome};
use expunge::{
    applicable_methods, certificate::Certificate, default_method, verify, Device, JobSpec,
    MethodKind, VerifyStrategy,
};
use signal_hook::consts::SIGINT;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "expunge")]
#[command(about = "Removable-media wipe engine with verification and destruction certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached whole-disk devices with their applicable wipe methods
    List {
        /// Include non-removable devices
        #[arg(long)]
        all: bool,
    },

    /// Wipe a device
    Wipe {
        /// Device path (e.g. /dev/sdb); omit when using --spec
        device: Option<String>,

        /// Wipe method (quick, zero-fill, random-fill, multi-pass-shred,
        /// ata-secure-erase, nvme-sanitize)
        #[arg(short, long, default_value = "zero-fill")]
        method: String,

        /// Verification strategy (none, sampled, full)
        #[arg(long, default_value = "none")]
        verify: String,

        /// Write a certificate of destruction to this path
        #[arg(short = 'o', long)]
        cert_output: Option<PathBuf>,

        /// Allow wiping a non-removable device (firmware purge flows)
        #[arg(long)]
        allow_non_removable: bool,

        /// Skip the interactive confirmation
        #[arg(short, long)]
        yes: bool,

        /// Load the job parameters from a JSON handoff record instead of
        /// the flags above
        #[arg(long)]
        spec: Option<PathBuf>,
    },

    /// Verify a previous wipe without writing anything
    Verify {
        /// Device path
        device: String,

        /// Method the device was wiped with (determines the expected fill)
        #[arg(short, long, default_value = "zero-fill")]
        method: String,

        /// Verification strategy (sampled, full)
        #[arg(long, default_value = "sampled")]
        strategy: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .init();

    if !nix::unistd::geteuid().is_root() {
        eprintln!(
            "{}",
            "Warning: not running as root; device access will likely fail.".yellow()
        );
    }

    match cli.command {
        Commands::List { all } => cmd_list(all),
        Commands::Wipe {
            device,
            method,
            verify,
            cert_output,
            allow_non_removable,
            yes,
            spec,
        } => cmd_wipe(device, method, verify, cert_output, allow_non_removable, yes, spec),
        Commands::Verify {
            device,
            method,
            strategy,
        } => cmd_verify(device, method, strategy),
    }
}

fn cmd_list(all: bool) -> Result<()> {
    let catalog = DeviceCatalog::system();
    let devices = catalog.list_devices();

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    for device in devices {
        if !all && !device.removable {
            continue;
        }

        let flag = if device.removable {
            "removable".green()
        } else {
            "internal".red()
        };
        println!(
            "{}  {:>8}  {}  {}  [{}]",
            device.path.bold(),
            human_size(device.size),
            device.transport,
            device.model.as_deref().unwrap_or("-"),
            flag,
        );

        let default = default_method(device.transport);
        for method in applicable_methods(device.transport) {
            let marker = if method.kind == default.kind { "*" } else { " " };
            println!(
                "    {marker} {:<18} {:<14} {}",
                method.kind.to_string(),
                format!("[{}]", method.compliance),
                method.description.split('.').next().unwrap_or_default()
            );
        }
    }

    Ok(())
}

fn load_spec(
    device: Option<String>,
    method: &str,
    verify: &str,
    allow_non_removable: bool,
    spec_path: Option<PathBuf>,
) -> Result<JobSpec> {
    if let Some(path) = spec_path {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading job spec {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("parsing job spec {}", path.display()));
    }

    let device = device.ok_or_else(|| anyhow!("a device path is required (or use --spec)"))?;
    Ok(JobSpec {
        device,
        method: method.parse().map_err(|e: String| anyhow!(e))?,
        verify: verify.parse().map_err(|e: String| anyhow!(e))?,
        allow_non_removable,
    })
}

fn cmd_wipe(
    device: Option<String>,
    method: String,
    verify_strategy: String,
    cert_output: Option<PathBuf>,
    allow_non_removable: bool,
    yes: bool,
    spec_path: Option<PathBuf>,
) -> Result<()> {
    let spec = load_spec(device, &method, &verify_strategy, allow_non_removable, spec_path)?;

    let catalog = DeviceCatalog::system();
    let target = catalog
        .find(&spec.device)
        .ok_or_else(|| anyhow!("device {} not found in the catalog", spec.device))?;

    println!(
        "Target: {} ({}, {}, {})",
        target.path.bold(),
        human_size(target.size),
        target.transport,
        target.model.as_deref().unwrap_or("unknown model"),
    );
    println!("Method: {} | Verification: {}", spec.method, spec.verify);

    if !yes && !confirm_destruction(&target)? {
        println!("Aborted.");
        return Ok(());
    }

    let engine = EraseEngine::system();
    let handle = engine.start(target.clone(), spec.method, spec.allow_non_removable)?;
    let job_log = handle.log();

    // Forward Ctrl+C as a cooperative cancellation request.
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))
        .context("installing SIGINT handler")?;

    let mut cursor = 0;
    while !handle.is_terminal() {
        for line in job_log.read_from(cursor) {
            println!("{line}");
            cursor += 1;
        }
        if interrupted.swap(false, Ordering::SeqCst) {
            eprintln!("{}", "Cancellation requested...".yellow());
            handle.cancel();
        }
        thread::sleep(Duration::from_millis(200));
    }

    let report = handle.wait();
    for line in report.log.iter().skip(cursor) {
        println!("{line}");
    }

    match &report.outcome {
        JobOutcome::Success => println!("{}", "Wipe completed successfully.".green().bold()),
        JobOutcome::Cancelled => {
            println!("{}", "Wipe cancelled.".yellow().bold());
            return Ok(());
        }
        JobOutcome::Failed(reason) => bail!("wipe failed: {}", reason.user_message()),
    }

    let verification = verify::verify(&target.path, target.size, spec.method, spec.verify)?;
    match spec.verify {
        VerifyStrategy::None => {}
        _ => {
            println!(
                "Verification ({}): {}{}",
                verification.strategy,
                verification.verdict.to_string().bold(),
                verification
                    .note
                    .as_deref()
                    .map(|n| format!(" ({n})"))
                    .unwrap_or_default()
            );
            if let Some(offset) = verification.mismatch_offset {
                println!("First mismatch at byte offset {offset}");
            }
        }
    }

    if let Some(path) = cert_output {
        let certificate = Certificate::from_job(&report, &verification);
        certificate.emit(&path)?;
        println!("Certificate saved at {}", path.display());
    }

    Ok(())
}

fn cmd_verify(device: String, method: String, strategy: String) -> Result<()> {
    let method: MethodKind = method.parse().map_err(|e: String| anyhow!(e))?;
    let strategy: VerifyStrategy = strategy.parse().map_err(|e: String| anyhow!(e))?;

    let catalog = DeviceCatalog::system();
    let target: Device = catalog
        .find(&device)
        .ok_or_else(|| anyhow!("device {device} not found in the catalog"))?;

    let result = verify::verify(&target.path, target.size, method, strategy)?;
    println!(
        "Verification ({}): {}{}",
        result.strategy,
        result.verdict.to_string().bold(),
        result
            .note
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );
    if let Some(offset) = result.mismatch_offset {
        println!("First mismatch at byte offset {offset}");
    }

    Ok(())
}

fn confirm_destruction(device: &Device) -> Result<bool> {
    print!(
        "Type 'YES' to wipe {} (THIS WILL DESTROY ALL DATA): ",
        device.path
    );
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "YES")
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}
