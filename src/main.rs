use clap::Parser;
use r2bridge::address::Addr;
use r2bridge::analysis::AnalysisOutcome;
use r2bridge::arch::{TargetDescription, ToolProfile};
use r2bridge::config::{Config, Decompiler};
use r2bridge::error::BrokenReason;
use r2bridge::memory::ProcPidProvider;
use r2bridge::session::{Session, SessionHook};
use rustyline::error::ReadlineError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target to open in the analysis tool: a file path or any uri the
    /// tool understands. Defaults to an empty malloc target.
    #[arg(default_value_t = String::from("-"))]
    target: String,

    /// Serve memory regions from a live process with this pid.
    #[arg(long)]
    pid: Option<i32>,

    /// Path to the tool executable, overrides the configuration file.
    #[arg(long)]
    tool: Option<PathBuf>,

    /// Architecture of the target in agent notation (x64, arm64, ia32, ...).
    #[arg(long)]
    arch: Option<String>,

    #[arg(long)]
    bits: Option<u32>,

    #[arg(long)]
    platform: Option<String>,

    /// Decompiler backend, overrides the configuration file.
    #[arg(long)]
    decompiler: Option<Decompiler>,

    /// Configuration file location.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct ConsoleHook;

impl SessionHook for ConsoleHook {
    fn on_broken(&self, reason: BrokenReason) {
        eprintln!("pipe is broken ({reason}), a new tool process starts on the next command");
    }

    fn on_analysis(&self, outcome: &AnalysisOutcome) {
        if !outcome.discovered.is_empty() {
            println!("region pass found {} functions", outcome.discovered.len());
        }
        match (&outcome.metadata, outcome.entry) {
            (Some(info), Some(entry)) => println!(
                "function {} at {entry}: {} bytes, {} instructions, {} call refs",
                info.name,
                info.size,
                outcome.instructions,
                info.callrefs.len(),
            ),
            _ => println!("no function at {}", outcome.requested),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(decompiler) = args.decompiler {
        config.decompiler = decompiler;
    }
    if let Some(tool) = args.tool {
        config.tool_path = Some(tool);
    }

    let host = TargetDescription::host();
    let target_machine = TargetDescription::new(
        args.arch.unwrap_or(host.arch),
        args.bits,
        args.platform.unwrap_or(host.platform),
    );

    let builder = Session::builder(&args.target)
        .with_config(config)
        .with_hook(ConsoleHook)
        .with_profile(ToolProfile::from_target(&target_machine));
    let session = match args.pid {
        Some(pid) => builder.with_provider(ProcPidProvider::new(pid)).open()?,
        None => builder.open()?,
    };

    if let Some(version) = session.tool_version() {
        println!("tool version {version}, target {}", session.target());
    }

    let mut editor = rustyline::DefaultEditor::new()?;
    loop {
        match editor.readline("r2b> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                _ = editor.add_history_entry(line);
                if matches!(line, "q" | "quit" | "exit") {
                    break;
                }
                if meta_command(&session, line) {
                    continue;
                }
                match session.cmd(line) {
                    Ok(out) => {
                        if !out.is_empty() {
                            println!("{out}")
                        }
                    }
                    Err(e) => {
                        eprintln!("error: {e}");
                        if e.is_fatal() {
                            break;
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Colon commands exercise the pipeline and environment api directly,
/// everything else goes to the tool verbatim.
fn meta_command(session: &Session, line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let Some(name) = tokens.next() else {
        return false;
    };
    if !name.starts_with(':') {
        return false;
    }

    match name {
        ":env" => match session.list_env() {
            Ok(env) => {
                for (key, value) in &env {
                    println!("{key} = {value}");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        },
        ":analyze" | ":graph" | ":decompile" => {
            let Some(addr) = tokens.next().and_then(|t| t.parse::<Addr>().ok()) else {
                eprintln!("usage: {name} <address>");
                return true;
            };
            run_pipeline_command(session, name, addr);
        }
        _ => eprintln!("unknown command {name}, expected :env, :analyze, :graph or :decompile"),
    }
    true
}

fn run_pipeline_command(session: &Session, name: &str, addr: Addr) {
    match name {
        ":analyze" => match session.analyze_at(addr) {
            Ok(rx) => {
                if let Ok(outcome) = rx.recv() {
                    ConsoleHook.on_analysis(&outcome);
                }
            }
            Err(e) => eprintln!("error: {e}"),
        },
        ":graph" => match session.graph_at(addr) {
            Ok(rx) => println!("{}", rx.recv().unwrap_or_default()),
            Err(e) => eprintln!("error: {e}"),
        },
        ":decompile" => match session.decompile_at(addr) {
            Ok(rx) => println!("{}", rx.recv().unwrap_or_default()),
            Err(e) => eprintln!("error: {e}"),
        },
        _ => unreachable!("checked by caller"),
    }
}
