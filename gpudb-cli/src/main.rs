//! Command-line interface for gpudb

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use gpudb::replay::{Outcome, Replay, Trace};
use gpudb::{Core, ProcessTracker, SurfaceSelector, TickSource, TrackerConfig};
use log::{debug, warn};

#[derive(Parser)]
#[command(name = "gpudb")]
#[command(version = gpudb::VERSION)]
#[command(about = "Per-process GPU resource accounting and idle profiling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Normal)]
    verbosity: Verbosity,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded workload and report what is left alive
    Replay {
        /// Trace file (JSON)
        trace: String,

        /// Which report to print
        #[arg(short, long, value_enum, default_value_t = Report::Processes)]
        report: Report,

        /// Restrict per-process reports to one pid
        #[arg(short, long)]
        pid: Option<u32>,

        /// Surface type index for the by-type report; 12 sums all types
        #[arg(long, default_value_t = -1)]
        surface: i64,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Export the usage snapshot to a JSON file
        #[arg(long)]
        json_output: Option<String>,
    },

    /// Print a configuration preset as JSON
    Config {
        /// Preset to print
        #[arg(value_enum, default_value_t = Preset::Default)]
        preset: Preset,
    },

    /// Show version information
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Minimal,
    Normal,
    Detailed,
    Debug,
}

impl Verbosity {
    fn level(self) -> log::LevelFilter {
        match self {
            Verbosity::Minimal => log::LevelFilter::Error,
            Verbosity::Normal => log::LevelFilter::Warn,
            Verbosity::Detailed => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Report {
    /// Live processes and their record counts
    Processes,
    /// Per-surface usage of one process
    Usage,
    /// Video memory detail per process
    ByPid,
    /// Video memory per surface type
    ByType,
    /// Counter dump of one process
    Counters,
    /// Idle time and switch count per core
    Idle,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Preset {
    Default,
    Compact,
    Debug,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(cli.verbosity.level())
        .init();

    match &cli.command {
        Commands::Replay {
            trace,
            report,
            pid,
            surface,
            format,
            json_output,
        } => {
            let trace = Trace::load(trace).with_context(|| format!("reading trace {}", trace))?;
            debug!("loaded {} events", trace.events.len());
            let replay = gpudb::replay(&trace).context("replaying trace")?;

            for failed in replay.failures() {
                if let Outcome::Failed(reason) = &failed.outcome {
                    warn!("event {} at tick {} failed: {}", failed.index, failed.tick, reason);
                }
            }

            match format {
                OutputFormat::Text => {
                    print!("{}", render_report(&replay.tracker, *report, *pid, *surface)?)
                }
                OutputFormat::Json => print_replay_json(&replay)?,
            }

            if let Some(json_path) = json_output {
                replay.tracker.usage_snapshot()?.export_json(json_path)?;
                println!("\nSnapshot exported to: {}", json_path);
            }
        }

        Commands::Config { preset } => {
            let config = match preset {
                Preset::Default => TrackerConfig::default(),
                Preset::Compact => TrackerConfig::compact(),
                Preset::Debug => TrackerConfig::debug(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Version => {
            println!("gpudb v{}", gpudb::version());
            println!("Library for per-process GPU resource accounting");
        }
    }

    Ok(())
}

fn render_report(
    tracker: &ProcessTracker,
    report: Report,
    pid: Option<u32>,
    surface: i64,
) -> anyhow::Result<String> {
    let text = match report {
        Report::Processes => tracker.render_process_list()?,
        Report::Usage => tracker.render_process_usage(require_pid(pid)?)?,
        Report::ByPid => tracker.render_usage_by_pid(pid)?,
        Report::ByType => tracker.render_usage_by_type(SurfaceSelector::from_raw(surface))?,
        Report::Counters => tracker.render_counter_dump(require_pid(pid)?)?,
        Report::Idle => {
            let mut out = String::new();
            for core in Core::ALL {
                let profiler = tracker.profiler();
                out.push_str(&format!(
                    "{:<4} idle={} switches={} state={}\n",
                    core.to_string(),
                    profiler.idle_time(core)?,
                    profiler.switch_count(core)?,
                    if profiler.is_idle(core)? { "idle" } else { "busy" }
                ));
            }
            out
        }
    };
    Ok(text)
}

fn require_pid(pid: Option<u32>) -> anyhow::Result<u32> {
    pid.context("this report needs --pid")
}

fn print_replay_json(replay: &Replay) -> anyhow::Result<()> {
    let value = serde_json::json!({
        "final_tick": replay.clock.now(),
        "snapshot": replay.tracker.usage_snapshot()?,
        "outcomes": replay.outcomes,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
