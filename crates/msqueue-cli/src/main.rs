mod stress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use msqueue_concurrent::LinkedQueue;
use msqueue_core::{init_tracing, ConfigManager, MsQueueConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::stress::{run_stress, StressMode, StressParams};

#[derive(Parser)]
#[command(name = "msqueue")]
#[command(about = "msqueue CLI - exercise and verify the lock-free queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file
    #[arg(long, global = true, env = "MSQUEUE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Push 1, 2, 3 and pop four times on a single thread
    Scenario,

    /// Run concurrent producers and consumers and verify nothing is lost
    Stress {
        /// Producer threads (defaults to stress.producers)
        #[arg(short, long)]
        producers: Option<usize>,

        /// Consumer threads (defaults to stress.consumers)
        #[arg(short, long)]
        consumers: Option<usize>,

        /// Items pushed by each producer
        #[arg(short, long)]
        items: Option<usize>,

        /// How consumers pop
        #[arg(short, long, value_enum, default_value = "wait")]
        mode: StressMode,

        /// Use the bounded queue with this capacity
        #[arg(long)]
        capacity: Option<usize>,

        /// Abort the run after this many milliseconds
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Serialize)]
struct ScenarioResult {
    pushed: Vec<i32>,
    popped: Vec<Option<i32>>,
    len: usize,
    is_empty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager =
        ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let mut config = manager.config().clone();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging).context("Failed to initialise logging")?;

    match execute_command(&cli, &config) {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn execute_command(cli: &Cli, config: &MsQueueConfig) -> Result<serde_json::Value> {
    match &cli.command {
        Commands::Scenario => execute_scenario(config),
        Commands::Stress {
            producers,
            consumers,
            items,
            mode,
            capacity,
            timeout_ms,
        } => {
            let params = StressParams {
                producers: producers.unwrap_or(config.stress.producers),
                consumers: consumers.unwrap_or(config.stress.consumers),
                items_per_producer: items.unwrap_or(config.stress.items_per_producer),
                mode: *mode,
                capacity: capacity.or(config.stress.capacity),
                timeout: Duration::from_millis(*timeout_ms),
                wait: config.wait.clone(),
            };
            let report = run_stress(&params)?;
            if !report.ok {
                bail!(
                    "queue lost or duplicated elements: missing={}, duplicated={}, fabricated={}",
                    report.missing,
                    report.duplicated,
                    report.fabricated
                );
            }
            if report.timed_out {
                bail!(
                    "stress run hit its {} ms deadline: {} items unpushed, {} left in queue",
                    timeout_ms,
                    report.unpushed,
                    report.left_in_queue
                );
            }
            Ok(serde_json::to_value(report)?)
        }
        Commands::Config(ConfigCommands::Show) => Ok(serde_json::to_value(config)?),
        Commands::Config(ConfigCommands::Init { path, force }) => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ConfigManager::create_default_config(path)?;
            Ok(serde_json::json!({
                "written": path.display().to_string(),
            }))
        }
    }
}

fn execute_scenario(config: &MsQueueConfig) -> Result<serde_json::Value> {
    let queue = LinkedQueue::with_wait_config(config.wait.clone());
    let pushed = vec![1, 2, 3];
    for &v in &pushed {
        queue.push(v);
    }
    let popped = (0..4).map(|_| queue.try_pop()).collect();

    let result = ScenarioResult {
        pushed,
        popped,
        len: queue.len(),
        is_empty: queue.is_empty(),
    };
    Ok(serde_json::to_value(result)?)
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}{}: {}", pad, key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}{}: {}", pad, key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b {
                            "true".green()
                        } else {
                            "false".red()
                        };
                        println!("{}{}: {}", pad, key_colored, val_colored);
                    }
                    serde_json::Value::Object(_) => {
                        println!("{}{}:", pad, key_colored);
                        print_pretty(val, indent + 1)?;
                    }
                    _ => {
                        println!("{}{}: {}", pad, key_colored, val);
                    }
                }
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
