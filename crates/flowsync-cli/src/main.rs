mod ui;

use std::cell::RefCell;
use std::fs;
use std::io;
use std::io::BufRead;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use flowsync_core::execution_merge_options;
use flowsync_core::Config;
use flowsync_core::ExecutionState;
use flowsync_core::Patch;
use flowsync_core::StateStore;
use flowsync_exec::extract_fragments;
use flowsync_exec::RawLine;
use flowsync_exec::RunController;
use flowsync_exec::RunMode;
use flowsync_exec::StartOptions;
use flowsync_exec::StateSink;
use flowsync_exec::SubprocessTransport;
use flowsync_exec::Transport;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::ui::Transcript;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "flowsync", version)]
#[command(about = "Run a flow and follow its execution state")]
struct Cli {
    /// Config file. Defaults to the platform config directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a run and follow it interactively.
    Run(RunArgs),
    /// Print the structured fragments found in a log, one JSON object per line.
    Extract {
        /// Log file to scan; reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Flow file to run.
    path: PathBuf,

    /// Run under the step-by-step debugger.
    #[arg(long)]
    step: bool,

    /// Print the full state as a JSON line after every change.
    #[arg(long)]
    json: bool,

    /// Extra arguments passed to the runner.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run_flow(&config, args),
        Command::Extract { file } => extract(file.as_deref()),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

fn extract(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    for fragment in extract_fragments(&text) {
        println!("{fragment}");
    }
    Ok(())
}

struct Session {
    store: StateStore,
    json: bool,
    changed: bool,
}

fn run_flow(config: &Config, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = execution_merge_options(&config.merge);
    let session = Rc::new(RefCell::new(Session {
        store: StateStore::new(options)?,
        json: args.json,
        changed: false,
    }));

    let sink_session = Rc::clone(&session);
    let sink = move |patch: Patch| {
        let mut session = sink_session.borrow_mut();
        match session.store.apply(&patch) {
            Ok(true) => {
                session.changed = true;
                if session.json {
                    println!("{}", session.store.current());
                }
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "dropping state patch"),
        }
    };

    let transport = SubprocessTransport::from_settings(&config.runner);
    let mut controller = RunController::new(transport, sink)
        .with_step_flag(config.runner.step_flag.clone())
        .with_raw_sink(|line: &RawLine| {
            tracing::debug!(stream = ?line.stream, at = %line.received_at, "{}", line.text);
        });

    let mode = if args.step {
        RunMode::Step
    } else {
        RunMode::Chat
    };
    controller.start(
        &args.path,
        StartOptions {
            mode,
            args: args.args,
        },
    )?;

    let input = spawn_stdin_reader();
    let mut transcript = Transcript::default();
    let mut stdin_open = true;
    loop {
        if session.borrow().changed {
            let state = snapshot(&session)?;
            if !args.json {
                for line in transcript.render(&state) {
                    println!("{line}");
                }
            }
            session.borrow_mut().changed = false;
        }
        if controller.is_idle() {
            break;
        }

        if stdin_open {
            match input.try_recv() {
                Ok(line) => {
                    let state = snapshot(&session)?;
                    route_input(&mut controller, &state, mode, line);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => stdin_open = false,
            }
        }
        controller.wait_for_event(POLL_INTERVAL);
    }

    let state = snapshot(&session)?;
    match state.chat.error.or(state.step_by_step.last_error) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

fn snapshot(session: &Rc<RefCell<Session>>) -> Result<ExecutionState, Box<dyn std::error::Error>> {
    Ok(session.borrow().store.snapshot()?)
}

/// `/stop` and `/interrupt` are handled locally; anything else answers the
/// prompt that is currently open.
fn route_input<T, S>(
    controller: &mut RunController<T, S>,
    state: &ExecutionState,
    mode: RunMode,
    line: String,
) where
    T: Transport,
    S: StateSink,
{
    match line.trim() {
        "/stop" => return controller.stop(),
        "/interrupt" => return controller.interrupt(),
        _ => {}
    }

    match mode {
        RunMode::Chat => controller.submit_input(&Value::String(line)),
        RunMode::Step => {
            let step = &state.step_by_step;
            match (&step.pending_control_input, &step.active_request) {
                (None, Some(request)) => controller.respond(object(json!({
                    "requestId": request.request_id,
                    "data": line,
                }))),
                _ => controller.send_control(object(json!({ "data": line }))),
            }
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "flowsync",
            "run",
            "flow.waldiez",
            "--step",
            "--",
            "--output",
            "out.py",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.step);
        assert!(!args.json);
        assert_eq!(args.path, PathBuf::from("flow.waldiez"));
        assert_eq!(args.args, vec!["--output".to_string(), "out.py".to_string()]);
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["flowsync", "extract", "--config", "cfg.toml", "log.txt"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        assert!(matches!(cli.command, Command::Extract { file: Some(_) }));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(Some(dir.path().join("none.toml").as_path())).expect("config");
        assert_eq!(config, Config::default());
    }
}
