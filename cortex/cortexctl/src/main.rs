use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use cortex_kernel::{Action, Dispatcher, StateKey, Syscall, TaskType, WorldState};
use cortex_runtime::{
    Driver, OracleResponse, OracleTaskExecutor, RuntimeConfig, RuntimeTelemetry, ScriptedOracle,
    StateStore,
};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::runtime::Runtime;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "cortexctl", version, about = "Cortex kernel control")]
struct Cli {
    /// Runtime configuration (TOML); built-in defaults when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replays a JSON-lines journal of wire actions.
    Replay {
        journal: PathBuf,
        /// Start from this exported state instead of the initial one.
        #[arg(long)]
        state: Option<PathBuf>,
        /// Write the final state here.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip actions the dispatcher refuses instead of stopping.
        #[arg(long)]
        keep_going: bool,
    },
    /// Prints a summary of an exported state, or one of its sub-records.
    Inspect {
        state: PathBuf,
        #[arg(long)]
        section: Option<String>,
    },
    /// Lists the snapshot ring of an exported state, optionally restoring one.
    Snapshots {
        state: PathBuf,
        #[arg(long)]
        restore: Option<String>,
        /// Where to write the restored state; defaults to overwriting `state`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Runs the driver against a scripted oracle.
    Drive {
        /// Step limit; the configured `driver.max_steps` when absent.
        #[arg(long)]
        steps: Option<usize>,
        /// JSON object mapping task types to arrays of oracle answers.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Input submitted before the run; repeatable.
        #[arg(long)]
        input: Vec<String>,
    },
    /// Writes a configuration file holding every default.
    Init {
        #[arg(long, default_value = "cortex.toml")]
        out: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    match cli.command {
        Commands::Replay {
            journal,
            state,
            out,
            keep_going,
        } => {
            let summary = replay(&config, &journal, state.as_deref(), out.as_deref(), keep_going)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Inspect { state, section } => {
            let state = read_state(&state)?;
            let view = match section {
                Some(section) => section_of(&state, &section)?,
                None => summarize(&state),
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Commands::Snapshots {
            state,
            restore,
            out,
        } => {
            let current = read_state(&state)?;
            match restore {
                Some(snapshot_id) => {
                    let restored = restore_snapshot(&config, current, &snapshot_id)?;
                    let target = out.unwrap_or(state);
                    write_state(&target, &restored)?;
                    println!("restored {snapshot_id} into {}", target.display());
                }
                None => {
                    for snapshot in current.snapshots.iter().rev() {
                        println!(
                            "{} | tick {} | {} | {}",
                            snapshot.id, snapshot.tick, snapshot.timestamp, snapshot.reason
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Drive {
            steps,
            script,
            input,
        } => drive(&config, steps, script.as_deref(), input),
        Commands::Init { out, force } => {
            ensure!(
                force || !out.exists(),
                "{} already exists; pass --force to overwrite",
                out.display()
            );
            let rendered = toml::to_string_pretty(&RuntimeConfig::default())?;
            fs::write(&out, rendered).with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {}", out.display());
            Ok(())
        }
    }
}

fn replay(
    config: &RuntimeConfig,
    journal: &Path,
    start: Option<&Path>,
    out: Option<&Path>,
    keep_going: bool,
) -> Result<Value> {
    let telemetry = RuntimeTelemetry::from_config("cortexctl", &config.telemetry)?;
    let store = StateStore::from_config(config, telemetry.clone());
    if let Some(path) = start {
        store.submit(&Action::ImportState(Box::new(read_state(path)?)))?;
    }

    let actions = read_journal(journal)?;
    let mut changed = 0;
    let mut refused = Vec::new();
    for (line, action) in &actions {
        let before = store.current();
        match store.submit(action) {
            Ok(after) => {
                if !Arc::ptr_eq(&before, &after) {
                    changed += 1;
                }
            }
            Err(err) if keep_going => {
                refused.push(json!({ "line": line, "action": action.label(), "error": err.to_string() }));
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("{}:{line}: {} refused", journal.display(), action.label())
                })
            }
        }
    }

    let state = store.current();
    if let Some(path) = out {
        write_state(path, &state)?;
    }
    telemetry.log(
        LogLevel::Info,
        "cortexctl.replay.finished",
        json!({ "journal": journal, "actions": actions.len(), "changed": changed }),
    )?;
    Ok(json!({
        "actions": actions.len(),
        "changed": changed,
        "refused": refused,
        "state": summarize(&state),
    }))
}

fn drive(
    config: &RuntimeConfig,
    steps: Option<usize>,
    script: Option<&Path>,
    inputs: Vec<String>,
) -> Result<()> {
    let telemetry = RuntimeTelemetry::from_config("cortexctl", &config.telemetry)?;
    let store = Arc::new(StateStore::from_config(config, telemetry.clone()));
    let resumed = store
        .restore_from_store()
        .context("restoring the saved state")?;
    for text in inputs {
        let trace_id = format!("cli-{}", Uuid::new_v4());
        store.submit(&Action::traced(Syscall::ReceiveInput { text }, trace_id))?;
    }

    let oracle = match script {
        Some(path) => load_script(path)?,
        None => ScriptedOracle::new(),
    };
    let executor = OracleTaskExecutor::new(Arc::new(oracle), &config.kernel);
    let driver = Driver::new(
        Arc::clone(&store),
        Arc::new(executor),
        config.driver.clone(),
        telemetry.clone(),
    );
    let runtime = Runtime::new()?;
    let report = runtime.block_on(async {
        let report = driver.run(steps).await;
        telemetry.flush().await;
        report
    })?;
    let persisted = store.persist().context("persisting the final state")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "resumed": resumed,
            "persistedBytes": persisted,
            "report": report,
            "state": summarize(&store.current()),
        }))?
    );
    Ok(())
}

fn read_journal(path: &Path) -> Result<Vec<(usize, Action)>> {
    let file = File::open(path).with_context(|| format!("opening journal {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut actions = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let action: Action = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not a wire action", path.display(), index + 1))?;
        actions.push((index + 1, action));
    }
    Ok(actions)
}

fn load_script(path: &Path) -> Result<ScriptedOracle> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading oracle script {}", path.display()))?;
    let script: BTreeMap<String, Vec<OracleResponse>> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let oracle = ScriptedOracle::new();
    for (task_type, answers) in script {
        let task_type = TaskType::from_str(&task_type).map_err(anyhow::Error::msg)?;
        for answer in answers {
            oracle.push(task_type, Ok(answer));
        }
    }
    Ok(oracle)
}

fn read_state(path: &Path) -> Result<WorldState> {
    let raw = fs::read(path).with_context(|| format!("reading state {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("{} is not an exported state", path.display()))
}

fn write_state(path: &Path, state: &WorldState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(state)?;
    fs::write(path, data).with_context(|| format!("writing state {}", path.display()))
}

fn restore_snapshot(config: &RuntimeConfig, state: WorldState, snapshot_id: &str) -> Result<WorldState> {
    ensure!(
        state.snapshots.iter().any(|snapshot| snapshot.id == snapshot_id),
        "no snapshot '{snapshot_id}' in the ring"
    );
    let dispatcher = Dispatcher::new(config.kernel.clone());
    let restored = dispatcher.dispatch(&Arc::new(state), &Action::restore(snapshot_id))?;
    Ok(WorldState::clone(&restored))
}

fn section_of(state: &WorldState, section: &str) -> Result<Value> {
    let Some(key) = StateKey::ALL.into_iter().find(|key| key.as_str() == section) else {
        let known: Vec<&str> = StateKey::ALL.iter().map(|key| key.as_str()).collect();
        bail!("unknown section '{section}'; expected one of {}", known.join(", "));
    };
    let mut value = serde_json::to_value(state)?;
    Ok(value
        .get_mut(key.as_str())
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn summarize(state: &WorldState) -> Value {
    json!({
        "tick": state.kernel.tick,
        "version": state.tuning.version.to_string(),
        "running": state.kernel.running.as_ref().map(|task| &task.id),
        "queued": state.kernel.queue.iter().map(|task| task.task_type()).collect::<Vec<_>>(),
        "sandbox": state.sandbox.status,
        "snapshots": state.snapshots.len(),
        "modifications": state.modifications.len(),
        "goals": state.goals.goals.len(),
        "memories": state.memory.entries.len(),
        "activity": state.activity.entries.len(),
        "persona": { "name": state.persona.name, "mood": state.persona.mood },
        "plugins": state.plugins.plugins.len(),
        "architectureProposals": state.architecture.proposals.len(),
    })
}
