//! steplock - record steps in one window, replay them wherever it is now
//!
//! Without a subcommand this opens the interactive console, preloading the
//! optional project file.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use steplock::recorder::platform::native_source;
use steplock::recorder::{storage, ReplayEvent, ReplayStatus, RecordingState};
use steplock::{EngineConfig, Error, ErrorCode, Project, ProjectStore, RunMode, Session, StepAction};

#[derive(Parser)]
#[command(name = "steplock")]
#[command(about = "Window-relative record and replay")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Project file to open in the console
    project: Option<PathBuf>,

    /// Config file (default: ~/.steplock/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a window and record steps in it until Ctrl+C
    Record {
        /// Project name
        #[arg(short, long, default_value = "recording")]
        name: String,

        /// Write the project here instead of the project store
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for the target click
        #[arg(long, default_value = "30")]
        pick_timeout: u64,
    },

    /// Replay a project
    Replay {
        /// Project file, or a name in the project store
        file: PathBuf,

        /// Execute one step per Enter
        #[arg(long)]
        step: bool,

        /// Seconds to wait before the first step
        #[arg(long, default_value = "2")]
        delay: u64,
    },

    /// Show variables and steps of a project
    Show {
        /// Project file, or a name in the project store
        file: PathBuf,
    },

    /// Write the spreadsheet template of a project
    Export {
        /// Project file, or a name in the project store
        file: PathBuf,

        /// Output .xlsx path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Click on a window and print what would be locked
    Pick {
        /// Seconds to wait for the click
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// List saved projects
    List,

    /// Delete a saved project
    Delete {
        /// File name in the project store
        file: String,
    },
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(e: Error) -> Output<()> {
        Output {
            success: false,
            data: None,
            error: Some(e),
        }
    }
}

fn print_json<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode output: {}", e),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("steplock=info,steplock_core=info,steplock_recorder=info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        None => console(config, cli.project.as_deref()),
        Some(Commands::Record {
            name,
            output,
            pick_timeout,
        }) => record(config, &name, output.as_deref(), pick_timeout),
        Some(Commands::Replay { file, step, delay }) => replay(config, &file, step, delay),
        Some(Commands::Show { file }) => show(&file),
        Some(Commands::Export { file, output }) => export(&file, &output),
        Some(Commands::Pick { timeout }) => pick(config, timeout),
        Some(Commands::List) => list(),
        Some(Commands::Delete { file }) => delete(&file),
    });

    if let Err(e) = result {
        if let Some(err) = e.downcast_ref::<Error>() {
            print_json(&Output::<()>::err(err.clone()));
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::discover(),
    };
    let config = config.map_err(Error::from)?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

/// An existing path as given, otherwise a name in the project store
fn resolve_project_path(file: &Path) -> Result<PathBuf> {
    if file.exists() {
        return Ok(file.to_path_buf());
    }
    let store = ProjectStore::new()?;
    let mut path = store.path().join(file);
    if path.extension().is_none() {
        path.set_extension("json");
    }
    Ok(path)
}

fn ctrlc_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

// ============================================================================
// Commands
// ============================================================================

fn record(config: EngineConfig, name: &str, output: Option<&Path>, pick_timeout: u64) -> Result<()> {
    let mut session = Session::native(config.clone())?;
    session.load_project(Project::new(name))?;

    eprintln!("Click on the window to record ({}s)...", pick_timeout);
    let window = session.pick_target(
        native_source(&config.capture)?,
        Some(Duration::from_secs(pick_timeout)),
    )?;
    eprintln!("Recording {} in \"{}\" (Ctrl+C to stop)", name, window.title);

    let running = ctrlc_flag()?;
    session.start_recording(native_source(&config.capture)?)?;

    let mut count = 0;
    let mut prompted = false;
    while running.load(Ordering::SeqCst) {
        let Some(status) = session.recording_status() else {
            break;
        };
        if status.steps_recorded != count {
            count = status.steps_recorded;
            eprint!("\r{} steps", count);
            io::stderr().flush()?;
        }
        match status.state {
            RecordingState::Lost if !prompted => {
                eprintln!("\nTarget window lost. Click the window to continue recording.");
                session.repick()?;
                prompted = true;
            }
            RecordingState::Armed => prompted = false,
            _ => {}
        }
        thread::sleep(Duration::from_millis(50));
    }

    let status = session.stop_recording()?;
    eprintln!("\n{} steps recorded", status.steps_recorded);

    let path = match output {
        Some(path) => {
            session.save_file(path)?;
            path.to_path_buf()
        }
        None => ProjectStore::new()?.save(&session.snapshot())?,
    };

    let project = session.snapshot();
    print_json(&Output::ok(serde_json::json!({
        "path": path,
        "steps": project.steps.len(),
        "target": project.target,
        "events_rejected": status.events_rejected,
    })));
    Ok(())
}

fn replay(config: EngineConfig, file: &Path, step: bool, delay: u64) -> Result<()> {
    let path = resolve_project_path(file)?;
    let mut session = Session::native(config)?;
    match session.load_file(&path)? {
        Some(window) => eprintln!("Target: \"{}\" ({})", window.title, window.handle),
        None => eprintln!("Target window not open yet, it is looked up again when replay starts"),
    }

    let project = session.snapshot();
    eprintln!("Replaying {} ({} steps)", project.name, project.steps.len());
    if delay > 0 {
        eprintln!("Starting in {} seconds...", delay);
        thread::sleep(Duration::from_secs(delay));
    }

    let running = ctrlc_flag()?;
    let status = if step {
        step_through(&mut session, &running)?
    } else {
        session.run()?;
        settle(&session, &running)?
    };

    let snapshot = session.snapshot();
    if snapshot.variables.iter().any(|v| v.direction == steplock::recorder::Direction::Output) {
        session.save_file(&path)?;
        eprintln!("Output variables written to {}", path.display());
    }

    print_json(&Output::ok(&status));
    match status.fault {
        Some(fault) => Err(fault.into()),
        None => Ok(()),
    }
}

/// One step per line of stdin until the run ends or input closes
fn step_through(session: &mut Session, running: &AtomicBool) -> Result<ReplayStatus> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let status = session.replay_status();
        if let Some(step) = session.snapshot().steps.get(status.cursor.position) {
            eprint!("[{}] {} - Enter to run, q to stop: ", step.index, step.label);
            io::stderr().flush()?;
        }
        let line = match lines.next() {
            Some(line) => line?,
            None => String::new(),
        };
        if line.trim() == "q" || !running.load(Ordering::SeqCst) {
            session.abort();
            return settle(session, running);
        }
        session.step()?;
        let status = settle(session, running)?;
        if status.fault.is_some() || matches!(status.cursor.mode, RunMode::Completed | RunMode::Idle) {
            return Ok(status);
        }
    }
}

/// Wait for the worker, printing progress and aborting on Ctrl+C
fn settle(session: &Session, running: &AtomicBool) -> Result<ReplayStatus> {
    let mut aborted = false;
    loop {
        for event in session.replay().events().try_iter() {
            report(&event);
        }
        match session.wait_replay(Duration::from_millis(100)) {
            Ok(status) => return Ok(status),
            Err(e) if e.code == ErrorCode::Cancelled => {
                if !session.replay().is_running() {
                    bail!("replay worker stopped unexpectedly");
                }
                if !aborted && !running.load(Ordering::SeqCst) {
                    eprintln!("Aborting after the current step...");
                    session.abort();
                    aborted = true;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn report(event: &ReplayEvent) {
    match event {
        ReplayEvent::StepStarted { index, label, .. } => eprintln!("[{}] {}", index, label),
        ReplayEvent::StepSkipped { index, .. } => eprintln!("[{}] skipped (disabled)", index),
        ReplayEvent::Faulted { error } => eprintln!("Fault: {}", error),
        ReplayEvent::ModeChanged { .. } | ReplayEvent::StepCompleted { .. } => {}
    }
}

fn show(file: &Path) -> Result<()> {
    let project = storage::load_file(resolve_project_path(file)?)?;
    print_json(&Output::ok(summarize(&project)));
    Ok(())
}

fn summarize(project: &Project) -> serde_json::Value {
    let variables: Vec<_> = project
        .variables
        .iter()
        .map(|v| {
            serde_json::json!({
                "key": v.key,
                "kind": v.kind,
                "direction": v.direction,
                "value": v.display_value(),
                "prompt_on_run": v.prompt_on_run,
            })
        })
        .collect();
    let steps: Vec<_> = project
        .steps
        .iter()
        .map(|s| {
            serde_json::json!({
                "index": s.index,
                "kind": s.action.kind_name(),
                "label": s.label,
                "enabled": s.enabled,
                "payload": s.action.payload_summary(),
            })
        })
        .collect();
    serde_json::json!({
        "name": project.name,
        "format": project.format,
        "updated_at": project.updated_at,
        "target": project.target,
        "variables": variables,
        "steps": steps,
    })
}

fn export(file: &Path, output: &Path) -> Result<()> {
    let project = storage::load_file(resolve_project_path(file)?)?;
    let bytes = storage::export_template(&project)?;
    std::fs::write(output, &bytes)?;
    print_json(&Output::ok(serde_json::json!({
        "path": output,
        "bytes": bytes.len(),
    })));
    Ok(())
}

fn pick(config: EngineConfig, timeout: u64) -> Result<()> {
    let mut session = Session::native(config.clone())?;
    eprintln!("Click on a window ({}s)...", timeout);
    let window = session.pick_target(native_source(&config.capture)?, Some(Duration::from_secs(timeout)))?;
    print_json(&Output::ok(&window));
    Ok(())
}

fn list() -> Result<()> {
    let store = ProjectStore::new()?;
    print_json(&Output::ok(store.list()?));
    Ok(())
}

fn delete(file: &str) -> Result<()> {
    let store = ProjectStore::new()?;
    store.delete(file)?;
    print_json(&Output::ok(serde_json::json!({ "deleted": file })));
    Ok(())
}

// ============================================================================
// Console
// ============================================================================

const HELP: &str = "\
pick [secs]            click the window to lock onto
record                 start recording in the locked window
pause | resume | stop  control the recording
run | step             replay all or the next step
reset | abort          cursor back to 1, or stop where it is
status                 session, recording and replay state
list                   steps of the project
label <n> <text>       rename step n
enable <n> | disable <n>
delete <n>             remove step n
move <from> <to>       reorder
wait <ms>              append a Wait step
focus                  append a Focus step
save [path]            write the project
export <path>          write the spreadsheet template
quit";

fn console(config: EngineConfig, project: Option<&Path>) -> Result<()> {
    let mut session = Session::native(config.clone())?;
    let mut path = project.map(Path::to_path_buf);
    if let Some(p) = &path {
        match session.load_file(p)? {
            Some(window) => eprintln!("Target: \"{}\"", window.title),
            None if session.snapshot().target.is_some() => eprintln!("Target window not open yet"),
            None => {}
        }
    }
    eprintln!("steplock console, type help for commands");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("{:?} > ", session.mode());
        io::stderr().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();
        if matches!(command, "quit" | "exit" | "q") {
            break;
        }
        if let Err(e) = dispatch(&mut session, &config, &mut path, command, &args) {
            match e.downcast::<Error>() {
                Ok(err) => print_json(&Output::<()>::err(err)),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    if session.recording_status().is_some() {
        let status = session.stop_recording()?;
        eprintln!("Recording stopped with {} steps (not saved)", status.steps_recorded);
    }
    Ok(())
}

fn dispatch(
    session: &mut Session,
    config: &EngineConfig,
    path: &mut Option<PathBuf>,
    command: &str,
    args: &[&str],
) -> Result<()> {
    match command {
        "help" => eprintln!("{}", HELP),
        "pick" => {
            let secs = args.first().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(30);
            eprintln!("Click on the window to record...");
            let window = session.pick_target(native_source(&config.capture)?, Some(Duration::from_secs(secs)))?;
            print_json(&Output::ok(&window));
        }
        "record" => {
            session.start_recording(native_source(&config.capture)?)?;
            eprintln!("Recording, type stop to finish");
        }
        "pause" if session.recording_status().is_some() => session.pause_recording()?,
        "resume" => session.resume_recording()?,
        "stop" => print_json(&Output::ok(session.stop_recording()?)),
        "run" => session.run()?,
        "step" => {
            session.step()?;
            print_json(&Output::ok(session.wait_replay(Duration::from_secs(60))?));
        }
        "pause" => session.pause(),
        "reset" => session.reset_step(),
        "abort" => session.abort(),
        "status" => print_json(&Output::ok(serde_json::json!({
            "mode": session.mode(),
            "target": session.target(),
            "recording": session.recording_status(),
            "replay": session.replay_status(),
        }))),
        "list" => print_json(&Output::ok(summarize(&session.snapshot())["steps"].clone())),
        "label" => {
            let n = position(args.first())?;
            let text = args.get(1..).unwrap_or_default().join(" ");
            session.edit(|steps| steps.set_label(n, text))?;
        }
        "enable" | "disable" => {
            let n = position(args.first())?;
            let enabled = command == "enable";
            session.edit(|steps| steps.set_enabled(n, enabled))?;
        }
        "delete" => {
            let n = position(args.first())?;
            let step = session.edit(|steps| steps.remove(n))?;
            eprintln!("Removed [{}] {}", step.index, step.label);
        }
        "move" => {
            let from = position(args.first())?;
            let to = position(args.get(1))?;
            session.edit(|steps| steps.move_step(from, to))?;
        }
        "wait" => {
            let ms = args.first().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(1000);
            let index = session.edit(|steps| steps.append(StepAction::Wait { ms, until: None }))?;
            eprintln!("Added [{}]", index);
        }
        "focus" => {
            let index = session.edit(|steps| steps.append(StepAction::Focus {}))?;
            eprintln!("Added [{}]", index);
        }
        "save" => {
            if let Some(p) = args.first() {
                *path = Some(PathBuf::from(p));
            }
            let saved = match path.as_ref() {
                Some(p) => {
                    session.save_file(p)?;
                    p.clone()
                }
                None => ProjectStore::new()?.save(&session.snapshot())?,
            };
            print_json(&Output::ok(serde_json::json!({ "path": saved })));
        }
        "export" => {
            let Some(out) = args.first() else {
                bail!("usage: export <path>");
            };
            std::fs::write(out, session.export_template()?)?;
            print_json(&Output::ok(serde_json::json!({ "path": out })));
        }
        other => bail!("unknown command {:?}, type help", other),
    }
    Ok(())
}

/// 1-based position as typed, 0-based as stored
fn position(arg: Option<&&str>) -> Result<usize> {
    let n: usize = match arg {
        Some(s) => s.parse()?,
        None => bail!("missing step number"),
    };
    if n == 0 {
        return Err(Error::invalid_step("steps are numbered from 1").into());
    }
    Ok(n - 1)
}
