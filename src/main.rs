//! Loom Worker CLI
//!
//! Entry point for the `loom-worker` command-line tool.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::{ColoredString, Colorize};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use loom_worker::config::ConfigOrigin;
use loom_worker::{
    EffectiveConfig, HttpCoordinator, JobDescriptor, JobHandle, JobPipeline, LogLevel, LogLine,
    LogSink, Stage, WorkerConfig,
};

/// How long the log tail waits for new lines before checking on the job
const TAIL_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "loom-worker")]
#[command(about = "Claim and run Loom marketplace jobs", version)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file layered over ~/.config/loom/worker.toml
    #[arg(long, short = 'c', global = true, env = "LOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Coordinator API base URL
    #[arg(long, global = true, env = "LOOM_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Prefix for relative script paths (empty: run them as local files)
    #[arg(long, global = true, env = "LOOM_SCRIPT_BASE_URL")]
    script_base_url: Option<String>,

    /// Directory holding one workspace per job
    #[arg(long, global = true, env = "LOOM_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Interpreter used to run job scripts
    #[arg(long, global = true, env = "LOOM_INTERPRETER")]
    interpreter: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim a job and print its details
    Claim {
        /// One-time slug issued by the marketplace
        slug: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Claim a job and run it, streaming its log
    Run {
        /// One-time slug issued by the marketplace
        slug: String,
    },

    /// Show the effective configuration and where it came from
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let effective = match load_config(&cli.overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Claim { slug, json } => run_claim(&effective, &slug, json),
        Commands::Run { slug } => run_job(&effective, &slug),
        Commands::Config { json } => run_config(&effective, json),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &ConfigArgs) -> Result<EffectiveConfig, loom_worker::ConfigError> {
    let host = EffectiveConfig::default_host_path();
    EffectiveConfig::build(host.as_deref(), args.config.as_deref(), Some(cli_overrides(args)))
}

/// CLI flags as a config layer; absent flags contribute nothing
fn cli_overrides(args: &ConfigArgs) -> Value {
    let mut layer = Map::new();
    if let Some(url) = &args.api_base_url {
        layer.insert("api_base_url".into(), Value::String(url.clone()));
    }
    if let Some(url) = &args.script_base_url {
        layer.insert("script_base_url".into(), Value::String(url.clone()));
    }
    if let Some(root) = &args.work_root {
        layer.insert("work_root".into(), Value::String(root.display().to_string()));
    }
    if let Some(interpreter) = &args.interpreter {
        let mut script = Map::new();
        script.insert("interpreter".into(), Value::String(interpreter.clone()));
        layer.insert("script".into(), Value::Object(script));
    }
    Value::Object(layer)
}

fn worker_config(effective: &EffectiveConfig) -> WorkerConfig {
    match effective.worker_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn build_pipeline(config: WorkerConfig) -> JobPipeline {
    let coordinator = match HttpCoordinator::new(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error creating coordinator client: {}", e);
            process::exit(1);
        }
    };
    match JobPipeline::new(config, Arc::new(coordinator), LogSink::new()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error creating downloader: {}", e);
            process::exit(1);
        }
    }
}

fn run_claim(effective: &EffectiveConfig, slug: &str, json_output: bool) {
    let pipeline = build_pipeline(worker_config(effective));

    let job = match pipeline.claim_job(slug) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(Stage::Claim.exit_code());
        }
    };

    if json_output {
        match serde_json::to_string_pretty(&job) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_job_info(&job);
    }
}

fn run_job(effective: &EffectiveConfig, slug: &str) {
    let pipeline = build_pipeline(worker_config(effective));
    let sink = pipeline.sink().clone();

    let job = match follow(&sink, pipeline.spawn_claim(slug)) {
        Some(Ok(job)) => job,
        Some(Err(e)) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(e.stage().exit_code());
        }
        None => {
            eprintln!("Claim thread exited without a result");
            process::exit(1);
        }
    };

    print_job_info(&job);
    println!();

    let Some(outcome) = follow(&sink, pipeline.spawn_run(job)) else {
        eprintln!("Job thread exited without a result");
        process::exit(1);
    };

    if outcome.is_success() {
        println!("{}", outcome.message().green().bold());
        process::exit(0);
    }
    eprintln!("{} {}", "Job failed:".red().bold(), outcome.message());
    process::exit(outcome.exit_code());
}

/// Print log lines as they arrive until the job thread finishes.
fn follow<T>(sink: &LogSink, handle: JobHandle<T>) -> Option<T> {
    let mut cursor = sink.cursor();
    loop {
        let batch = sink.wait_from(cursor, TAIL_POLL);
        batch.lines.iter().for_each(print_line);
        cursor = batch.cursor;

        if handle.is_finished() {
            sink.read_from(cursor).lines.iter().for_each(print_line);
            return handle.wait();
        }
    }
}

fn print_line(line: &LogLine) {
    let text = format!("> {}", line.text);
    let colored: ColoredString = match line.level {
        LogLevel::Info | LogLevel::Stdout => text.normal(),
        LogLevel::Warning => text.yellow(),
        LogLevel::Error => text.red(),
        LogLevel::Success => text.green(),
        LogLevel::Command => text.cyan(),
        LogLevel::Stderr => text.magenta(),
    };
    println!("{}", colored);
}

fn print_job_info(job: &JobDescriptor) {
    println!("{}", "Job information".bold());
    println!("  ID:           {}", job.id());
    println!("  Title:        {}", job.title().unwrap_or("N/A"));
    println!("  Type:         {}", job.kind().unwrap_or("N/A"));
    println!("  Price:        {}", job.price());
    println!("  Dataset link: {}", job.dataset_url().unwrap_or("None"));
    println!("  Script path:  {}", job.script_ref());
}

fn run_config(effective: &EffectiveConfig, json_output: bool) {
    if json_output {
        match effective.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("{}", "Sources (lowest precedence first)".bold());
    for source in &effective.sources {
        let origin = match source.origin {
            ConfigOrigin::Builtin => "builtin",
            ConfigOrigin::Host => "host",
            ConfigOrigin::File => "file",
            ConfigOrigin::Cli => "cli",
        };
        match (&source.path, &source.digest) {
            (Some(path), Some(digest)) => {
                println!("  {:<8} {} (sha256 {})", origin, path, &digest[..12.min(digest.len())])
            }
            (Some(path), None) => println!("  {:<8} {}", origin, path),
            _ => println!("  {}", origin),
        }
    }
    println!();

    let config = worker_config(effective);
    match toml::to_string_pretty(&config) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}
