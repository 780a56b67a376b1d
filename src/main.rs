mod backup;
mod bench;
mod error;
mod manager;
mod orchestrator;
mod registry;
mod settings;
mod sources;
mod traits;
mod types;

use anyhow::Result;
use backup::BackupOutcome;
use bench::{BenchmarkReport, ProbeFailure};
use clap::{Parser, Subcommand};
use error::MirrorError;
use orchestrator::{Orchestrator, Target};
use settings::Settings;
use sources::get_manager;
use std::process::ExitCode;
use traits::SourceManager;
use types::{Backend, RestoreOutcome, SetOutcome};

#[derive(Parser)]
#[command(name = "cmirror")]
#[command(about = "A high-performance mirror manager for China", long_about = None)]
struct Cli {
    /// Log what cmirror is doing (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration (e.g., cmirror status [pip])
    Status {
        /// The tool name (pip, docker, etc.). If omitted, shows all.
        name: Option<String>,
    },
    /// Benchmark mirrors (e.g., cmirror test pip)
    Test {
        /// The tool name
        name: String,

        /// Per-mirror timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Apply a new mirror (e.g., cmirror use pip --fastest)
    Use {
        /// The tool name
        name: String,

        /// Mirror alias (e.g., Aliyun)
        #[arg(required_unless_present = "fastest")]
        source: Option<String>,

        /// Auto-select the fastest mirror
        #[arg(long, short, conflicts_with = "source")]
        fastest: bool,

        /// Per-mirror timeout in seconds (with --fastest)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Restore the configuration to the previous backup
    Restore {
        /// The tool name
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e
                .downcast_ref::<MirrorError>()
                .map_or("error", MirrorError::kind);
            eprintln!("error[{}]: {:#}", kind, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let mut settings = Settings::load()?;

    match command {
        Commands::Status { name } => handle_status(name, &settings).await?,
        Commands::Test { name, timeout } => {
            settings.timeout_secs = timeout.unwrap_or(settings.timeout_secs);
            handle_test(&name, &settings).await?
        }
        Commands::Use {
            name,
            source,
            fastest,
            timeout,
        } => {
            settings.timeout_secs = timeout.unwrap_or(settings.timeout_secs);
            let target = match source {
                Some(alias) if !fastest => Target::Named(alias),
                _ => Target::Fastest,
            };
            handle_use(&name, &target, &settings).await?
        }
        Commands::Restore { name } => handle_restore(&name, &settings).await?,
    }

    Ok(())
}

// --- Handlers ---

async fn handle_status(name: Option<String>, settings: &Settings) -> Result<()> {
    let managers: Vec<Box<dyn SourceManager>> = match name {
        Some(n) => vec![get_manager(&n, settings)?],
        None => Backend::ALL
            .iter()
            .map(|b| get_manager(b.name(), settings))
            .collect::<Result<_, _>>()?,
    };

    println!("{}", "-".repeat(70));
    println!("{:<10} Status", "Tool");
    println!("{}", "-".repeat(70));

    for (manager, status) in Orchestrator::default().status(&managers).await {
        let status_display = match status {
            Ok(status) => status.to_string(),
            // 单个工具出错不影响其它工具
            Err(e) => format!("error[{}]: {}", e.kind(), e),
        };
        println!("{:<10} {}", manager.name(), status_display);
    }
    println!("{}", "-".repeat(70));

    Ok(())
}

async fn handle_test(name: &str, settings: &Settings) -> Result<()> {
    let manager = get_manager(name, settings)?;
    let report = Orchestrator::default().benchmark(manager.as_ref()).await?;

    println!();
    print_report(&report);

    // Recommendation
    let Some(best) = report.fastest() else {
        println!("No mirror answered within {}s.", settings.timeout_secs);
        return Ok(());
    };
    println!("{}", "-".repeat(60));

    let current = report.current();
    match (report.speedup(), current) {
        (Some(ratio), _) => println!(
            "Recommendation: '{}' is {:.1}x faster than your current source.",
            best.mirror.name, ratio
        ),
        (None, Some(cur)) if cur.latency.is_none() => println!(
            "Recommendation: '{}' is significantly faster than your current source ({}).",
            best.mirror.name,
            cur.error
                .as_ref()
                .map_or_else(|| "Timeout".to_string(), ProbeFailure::label)
        ),
        (None, Some(cur)) if cur.latency == best.latency => {
            println!(
                "Recommendation: Your current source '{}' is already the fastest.",
                cur.mirror.name
            );
            return Ok(());
        }
        _ => println!("Recommendation: '{}' is the fastest.", best.mirror.name),
    }
    println!("Run 'cmirror use {} {}' to apply.", name, best.mirror.name);

    Ok(())
}

fn print_report(report: &BenchmarkReport) {
    println!("{:<4} {:<10} {:<12} URL", "RANK", "LATENCY", "NAME");
    println!("{}", "-".repeat(60));

    for (i, res) in report.results.iter().enumerate() {
        let latency_str = match (res.latency_ms(), &res.error) {
            (Some(ms), _) => format!("{}ms", ms),
            (None, Some(failure)) => failure.label(),
            (None, None) => "Timeout".to_string(),
        };
        let marker = if res.current { " (current)" } else { "" };

        println!(
            "{:<4} {:<10} {:<12} {}{}",
            i + 1,
            latency_str,
            res.mirror.name,
            res.mirror.url,
            marker
        );
    }
}

async fn handle_use(name: &str, target: &Target, settings: &Settings) -> Result<()> {
    let manager = get_manager(name, settings)?;

    if *target == Target::Fastest {
        println!("Finding fastest mirror...");
    }
    let applied = Orchestrator::default().apply(manager.as_ref(), target).await?;

    if let Some(best) = applied.report.as_ref().and_then(BenchmarkReport::fastest) {
        println!(
            "Fastest mirror is {} ({}ms)",
            best.mirror.name,
            best.latency_ms().unwrap_or_default()
        );
    }

    match applied.outcome {
        SetOutcome::Written(backup) => {
            if let BackupOutcome::Created(record) = backup {
                println!("Backup created at: {}", record.backup_path.display());
            }
            println!("Success! {} is now using {}.", name, applied.mirror.name);
        }
        SetOutcome::Unchanged => {
            println!("{} is already using {}.", name, applied.mirror.name);
        }
        SetOutcome::Manual(commands) => {
            println!("To apply this mirror, please run the following commands in your terminal:");
            println!();
            for line in commands {
                println!("    {}", line);
            }
            println!();
            println!("To make it permanent, add the above lines to your ~/.zshrc or ~/.bash_profile.");
        }
    }

    Ok(())
}

async fn handle_restore(name: &str, settings: &Settings) -> Result<()> {
    let manager = get_manager(name, settings)?;

    println!("Restoring {} configuration...", name);
    match Orchestrator::default().restore(manager.as_ref()).await? {
        RestoreOutcome::Restored(record) => {
            println!("Restored from backup: {}", record.backup_path.display());
            println!("Success! {} configuration restored.", name);
        }
        RestoreOutcome::Manual(commands) => {
            println!("To restore {} configuration, please run:", name);
            println!();
            for line in commands {
                println!("    {}", line);
            }
            println!();
            println!("If you added these to your shell profile, please remove them manually.");
        }
    }

    Ok(())
}
