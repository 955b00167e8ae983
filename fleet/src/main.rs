//! `fleet` command-line interface.
//!
//! Keeps orchestration state in `.fleet/` under the project root. `fleet run`
//! is the daemon; the other commands inspect or nudge a run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use fleet::core::state::OrchestrationState;
use fleet::daemon::Daemon;
use fleet::exit_codes;
use fleet::io::alerts::JsonlAlertSink;
use fleet::io::init::{InitOptions, init_fleet};
use fleet::io::memory::FileContextSource;
use fleet::io::session::LaunchError;
use fleet::io::tmux::TmuxRuntime;
use fleet::io::workspace::{GitVcs, WorkspaceConflictError};
use fleet::looping::{LoopOptions, run_loop};
use fleet::phase_ops::{WorkspacesRetained, close_phase, launch_phase};
use fleet::start::{RunContext, open_run};
use fleet::status::{StatusReport, render_order};
use fleet::validate::{StateValidation, validate_fleet};

#[derive(Parser)]
#[command(name = "fleet", version, about = "Phased multi-agent orchestration daemon")]
struct Cli {
    /// Project root containing `.fleet/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.fleet/` with a sample graph and default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check config, graph and persisted state.
    Validate,
    /// Show phase and worker status.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the suggested integration (merge) order.
    Order,
    /// Run the monitoring daemon.
    Run {
        /// Run a single iteration and exit.
        #[arg(long, conflicts_with = "max_iterations")]
        once: bool,
        /// Stop after this many iterations.
        #[arg(long)]
        max_iterations: Option<u64>,
    },
    /// Launch a phase now, skipping the grace period and dependency gate.
    LaunchPhase { phase: u32 },
    /// Reclaim the workspaces of a phase.
    ClosePhase {
        phase: u32,
        /// Close even if the phase is not complete.
        #[arg(long)]
        force: bool,
    },
}

type CliDaemon = Daemon<TmuxRuntime, GitVcs, FileContextSource, JsonlAlertSink>;

fn main() {
    fleet::logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    let root = root.as_path();
    match cli.command {
        Command::Init { force } => {
            let paths = init_fleet(root, &InitOptions { force })?;
            println!("initialized {}", paths.fleet_dir.display());
        }
        Command::Validate => {
            let outcome = validate_fleet(root)?;
            println!(
                "ok: {} workers in phases {:?}",
                outcome.workers, outcome.phases
            );
            match outcome.state {
                StateValidation::NotStarted => println!("state: not started"),
                StateValidation::Consistent {
                    iteration,
                    current_phase,
                } => println!("state: consistent (iteration {iteration}, phase {current_phase})"),
            }
        }
        Command::Status { json } => {
            let run = open_run(root)?;
            let report = StatusReport::build(&run.graph, &run.state);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Order => {
            let run = open_run(root)?;
            print!("{}", render_order(&run.graph));
        }
        Command::Run {
            once,
            max_iterations,
        } => {
            let (daemon, mut state) = build_daemon(open_run(root)?)?;
            let options = LoopOptions {
                max_iterations: if once { Some(1) } else { max_iterations },
                poll_interval: daemon.config().poll_interval(),
            };
            let outcome = run_loop(&daemon, &mut state, &options, |_| {})?;
            println!(
                "{} iteration(s), orchestration {}",
                outcome.iterations,
                if outcome.orchestration_complete {
                    "complete"
                } else {
                    "in progress"
                }
            );
        }
        Command::LaunchPhase { phase } => {
            let (daemon, mut state) = build_daemon(open_run(root)?)?;
            let report = launch_phase(&daemon, &mut state, phase, Utc::now())?;
            println!(
                "phase {phase}: started [{}], reused [{}]",
                report.started.join(", "),
                report.reused.join(", ")
            );
        }
        Command::ClosePhase { phase, force } => {
            let (daemon, mut state) = build_daemon(open_run(root)?)?;
            let report = close_phase(&daemon, &mut state, phase, force, Utc::now())?;
            println!(
                "phase {phase}: removed [{}], already gone [{}]",
                report.removed.join(", "),
                report.already_gone.join(", ")
            );
        }
    }
    Ok(())
}

/// Wire the production adapters around a loaded run.
fn build_daemon(run: RunContext) -> Result<(CliDaemon, OrchestrationState)> {
    let RunContext {
        paths,
        config,
        graph,
        state,
        ..
    } = run;
    let runtime = TmuxRuntime::new(&graph.project().slug, &config);
    let memory = FileContextSource::new(&paths.memory_dir);
    let alerts = JsonlAlertSink::new(&paths.alerts_path);
    let vcs = GitVcs::new(&paths.root);
    let daemon = Daemon::new(graph, config, paths, runtime, vcs, memory, alerts)?;
    Ok((daemon, state))
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let conflict = err.downcast_ref::<WorkspaceConflictError>().is_some()
        || err.downcast_ref::<LaunchError>().is_some()
        || err.downcast_ref::<WorkspacesRetained>().is_some();
    if conflict {
        exit_codes::CONFLICT
    } else {
        exit_codes::INVALID
    }
}
