use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crew::log::LogLevel;
use crew::{clog, CapabilityRegistry, Config, CrewDefinition, Error, FailurePolicy, Result};

/// crew - run a crew of agents over a task graph
#[derive(Parser, Debug)]
#[command(name = "crew")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CREW_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.crew/crew.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file to use instead of ~/.crew/crew.toml
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Kick off the crew described in a definition file
    Run {
        /// Crew definition (TOML, or JSON with a .json extension)
        file: PathBuf,

        /// Failure policy: fail-fast or best-effort
        #[arg(long)]
        policy: Option<FailurePolicy>,

        /// Per-task time limit in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Kickoff input as key=value; repeatable
        #[arg(short = 'i', long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
    },

    /// Check a definition without running it
    Validate {
        /// Crew definition file
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn parse_input(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Level the config asks for, unless `--debug` already decided it.
fn config_log_level(cli_debug: bool, config: &Config) -> Option<LogLevel> {
    if cli_debug {
        return None;
    }
    config
        .log_level
        .or(config.debug.then_some(LogLevel::Debug))
}

/// Apply `crew run` overrides that live in the config and re-check it.
fn apply_run_overrides(config: &mut Config, timeout: Option<u64>) -> Result<()> {
    if timeout.is_some() {
        config.task_timeout_secs = timeout;
    }
    config.validate()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before loading config, so config loading is logged too.
    crew::log::init(cli.debug);
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = config_log_level(cli.debug, &config) {
        crew::log::set_level(level);
    }

    match cli.command {
        Command::Run {
            file,
            policy,
            timeout,
            inputs,
        } => {
            apply_run_overrides(&mut config, timeout)?;
            run_crew(file, config, policy, inputs)
        }
        Command::Validate { file } => run_validate(file, config),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_crew(
    file: PathBuf,
    config: Config,
    policy: Option<FailurePolicy>,
    inputs: Vec<(String, String)>,
) -> Result<()> {
    let definition = CrewDefinition::load(&file)?;
    let mut kickoff_inputs: HashMap<String, String> = definition.inputs();
    kickoff_inputs.extend(inputs);
    let policy = definition.resolve_policy(policy, &config);

    clog!(
        "Run command: file={}, policy={}, inputs={}",
        file.display(),
        policy,
        kickoff_inputs.len()
    );

    let rt = tokio::runtime::Runtime::new()?;
    let output = rt.block_on(async {
        let cancel = CancellationToken::new();
        let crew = definition
            .build_with_policy(&CapabilityRegistry::default(), &config, Some(policy))?
            .with_cancellation(cancel.clone());

        // Ctrl-C stops the run at the next task boundary.
        let signal_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling after the current task...");
                signal_token.cancel();
            }
        });

        crew.kickoff_with_inputs(kickoff_inputs).await
    })?;

    println!("Crew Results: {}", serde_json::to_string_pretty(&output)?);

    for failed in output.failures() {
        eprintln!("  {} {}", failed.name, failed.status);
    }
    if !output.is_success() {
        std::process::exit(2);
    }
    Ok(())
}

fn run_validate(file: PathBuf, config: Config) -> Result<()> {
    let definition = CrewDefinition::load(&file)?;
    let rt = tokio::runtime::Runtime::new()?;
    let order = rt.block_on(async {
        let crew = definition.build(&CapabilityRegistry::default(), &config)?;
        let order = crew.validate().await?;
        let tasks = crew.tasks().await;
        Ok::<_, Error>(
            order
                .iter()
                .filter_map(|id| tasks.iter().find(|t| &t.id == id))
                .map(|t| t.name.clone())
                .collect::<Vec<_>>(),
        )
    })?;

    println!("{} is valid. Execution order:", file.display());
    for (i, name) in order.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    Ok(())
}
