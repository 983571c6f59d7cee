//! ledger-runner: headless driver for the referral ledger.
//!
//! Usage:
//!   ledger-runner --commands events.jsonl --db ledger.db
//!   ledger-runner --seed 12345 --users 500
//!   ledger-runner --db ledger.db --ipc-mode

mod synth;

use anyhow::{Context, Result};
use referral_core::{
    clock::SystemClock,
    command::LedgerCommand,
    config::{EngineConfig, ENGINE_CONFIG_FILE},
    eligibility::AlwaysEligible,
    engine::ReferralEngine,
    types::UserId,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    Command { command: LedgerCommand },
    Tree { user_id: UserId },
    Earnings { user_id: UserId },
    Quit,
}

#[derive(serde::Serialize)]
struct RunSummary {
    commands_applied:  usize,
    commands_rejected: usize,
    users:             i64,
    edges:             i64,
    finished_edges:    i64,
    promotions:        i64,
    accruals:          i64,
    leaders:           Vec<Leader>,
}

#[derive(serde::Serialize)]
struct Leader {
    user_id:  UserId,
    tier:     u32,
    level:    u32,
    total:    i64,
    balance:  i64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let users = parse_arg(&args, "--users", 200u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let commands_file = flag_value(&args, "--commands");

    let config = load_config(data_dir)?;
    let mut engine = ReferralEngine::open(
        db,
        &config,
        Arc::new(SystemClock),
        Arc::new(AlwaysEligible),
    )?;

    if ipc_mode {
        return run_ipc_loop(&mut engine);
    }

    let commands = match commands_file {
        Some(path) => read_commands(path)?,
        None => {
            log::info!("generating synthetic network: seed={seed} users={users}");
            synth::generate(seed, users)
        }
    };

    let (applied, rejected) = replay(&mut engine, &commands)?;
    let summary = summarize(&mut engine, applied, rejected)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_config(data_dir: &str) -> Result<EngineConfig> {
    if Path::new(data_dir).join(ENGINE_CONFIG_FILE).exists() {
        EngineConfig::load(data_dir)
    } else {
        log::warn!("no {ENGINE_CONFIG_FILE} in {data_dir}, using defaults");
        Ok(EngineConfig::default())
    }
}

fn read_commands(path: &str) -> Result<Vec<LedgerCommand>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {path}"))?;
    let mut commands = Vec::new();
    for (line_no, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: invalid command", line_no + 1))?;
        commands.push(command);
    }
    Ok(commands)
}

/// Apply every command. Caller errors are counted and skipped; anything
/// else aborts the run.
fn replay(engine: &mut ReferralEngine, commands: &[LedgerCommand]) -> Result<(usize, usize)> {
    let (mut applied, mut rejected) = (0, 0);
    for command in commands {
        match engine.apply(command) {
            Ok(()) => applied += 1,
            Err(err) if err.is_permanent() => {
                log::warn!("{} rejected: {err}", command.name());
                rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok((applied, rejected))
}

fn summarize(
    engine:   &mut ReferralEngine,
    applied:  usize,
    rejected: usize,
) -> Result<RunSummary> {
    let (users, (edges, finished_edges), top) = engine.store_mut().read(|tx| {
        Ok((tx.user_count()?, tx.edge_count()?, tx.top_users(10)?))
    })?;
    let (promotions, accruals) = engine.store_mut().read(|tx| {
        Ok((tx.event_count("promoted")?, tx.event_count("earnings_accrued")?))
    })?;
    let leaders = top
        .into_iter()
        .map(|u| Leader {
            user_id: u.user_id,
            tier:    u.position.tier,
            level:   u.position.level,
            total:   u.total_earnings,
            balance: u.balance_earnings,
        })
        .collect();
    Ok(RunSummary {
        commands_applied: applied,
        commands_rejected: rejected,
        users,
        edges,
        finished_edges,
        promotions,
        accruals,
        leaders,
    })
}

fn run_ipc_loop(engine: &mut ReferralEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let request: IpcRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match request {
            IpcRequest::Quit => break,
            IpcRequest::Command { command } => match engine.apply(&command) {
                Ok(()) => serde_json::json!({ "ok": true }),
                Err(err) if err.is_permanent() => serde_json::json!({ "error": err.to_string() }),
                Err(err) => return Err(err.into()),
            },
            IpcRequest::Tree { user_id } => match engine.get_tree(&user_id) {
                Ok(tree) => serde_json::to_value(tree)?,
                Err(err) => serde_json::json!({ "error": err.to_string() }),
            },
            IpcRequest::Earnings { user_id } => match engine.get_earnings_summary(&user_id) {
                Ok(summary) => serde_json::to_value(summary)?,
                Err(err) => serde_json::json!({ "error": err.to_string() }),
            },
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
