use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use armory_ledger::identity::Identity;
use armory_ledger::scenario::{self, Scenario, ScenarioReport};
use armory_ledger::{ArmoryConfig, SettlementPolicy, TracingSink};

#[derive(Parser)]
#[command(name = "armory", version, about = "Token, weapon shop and flash-loan ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a scenario and print every step followed by the final state.
    Run {
        scenario: PathBuf,
        /// Replace the scenario's embedded config with this file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Stop at the first step whose result differs from `expect_failure`.
        #[arg(long)]
        strict: bool,
    },
    /// Execute a scenario and print only the final state.
    Snapshot {
        scenario: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Generate (or load) an ed25519 key and print its account id.
    Keygen {
        #[arg(long, value_name = "HEX")]
        secret: Option<String>,
    },
    /// Replay the historical flash-loan drain against a fresh pool.
    Exploit {
        #[arg(long, value_enum, default_value_t = Policy::Guarded)]
        policy: Policy,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Guarded,
    Unguarded,
}

impl From<Policy> for SettlementPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Guarded => SettlementPolicy::Guarded,
            Policy::Unguarded => SettlementPolicy::Unguarded,
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("{e}"))?;
    println!("{text}");
    Ok(())
}

fn print_steps(report: &ScenarioReport) {
    for step in &report.steps {
        let mark = if step.as_expected() { "ok " } else { "!! " };
        let head = format!("{mark}#{} {} {}", step.index, step.caller, step.op);
        match (&step.outcome, &step.error) {
            (Some(outcome), _) => match serde_json::to_string(outcome) {
                Ok(text) => println!("{head} -> {text}"),
                Err(_) => println!("{head} -> done"),
            },
            (None, Some(err)) => println!("{head} failed: {err}"),
            (None, None) => println!("{head}"),
        }
    }
}

fn run_scenario(
    path: &Path,
    config: Option<&Path>,
    strict: bool,
) -> Result<ScenarioReport, String> {
    let mut plan = Scenario::load(path).map_err(|e| format!("{e}"))?;
    if let Some(config) = config {
        plan.config = ArmoryConfig::load(config).map_err(|e| format!("{e}"))?;
    }
    scenario::run(&plan, TracingSink, strict).map_err(|e| format!("{e}"))
}

fn verdict(report: &ScenarioReport) -> ExitCode {
    let unexpected = report.unexpected().count();
    if unexpected == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{unexpected} step(s) did not go as expected");
        ExitCode::FAILURE
    }
}

fn exec(command: Command) -> Result<ExitCode, String> {
    match command {
        Command::Run {
            scenario,
            config,
            strict,
        } => {
            let report = run_scenario(&scenario, config.as_deref(), strict)?;
            print_steps(&report);
            print_json(&report.snapshot)?;
            Ok(verdict(&report))
        }
        Command::Snapshot { scenario, config } => {
            let report = run_scenario(&scenario, config.as_deref(), false)?;
            print_json(&report.snapshot)?;
            Ok(verdict(&report))
        }
        Command::Keygen { secret } => {
            let identity = match secret {
                Some(hex) => Identity::from_secret_hex(&hex).map_err(|e| format!("{e}"))?,
                None => Identity::generate(),
            };
            println!("address: {}", identity.address());
            println!("public:  {}", identity.public_hex());
            println!("secret:  {}", identity.secret_hex());
            Ok(ExitCode::SUCCESS)
        }
        Command::Exploit { policy } => {
            let policy = SettlementPolicy::from(policy);
            let plan = scenario::exploit_scenario(policy);
            let report = scenario::run(&plan, TracingSink, false).map_err(|e| format!("{e}"))?;
            print_steps(&report);
            let pool = &plan.config.pool;
            let before = plan
                .steps
                .iter()
                .find_map(|step| match &step.op {
                    scenario::Operation::Mint { to, amount } if to == pool => Some(*amount),
                    _ => None,
                })
                .unwrap_or(0);
            let after = report.snapshot.balances.get(pool).copied().unwrap_or(0);
            if after < before {
                println!("{policy:?}: pool drained, {before} -> {after}");
            } else {
                println!("{policy:?}: pool intact at {after}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match exec(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
