//! `ralph`: runs one batch of tool calls through the policy core and prints
//! the results as JSON (`spec.md` §6).

mod subagent_worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use clap::Parser;
use clap::Subcommand;

use ralph_core::approval_channel::ApprovalMultiplexer;
use ralph_core::batch_executor::BatchExecutor;
use ralph_core::gate_config::GateConfig;
use ralph_core::prompter::GatePrompter;
use ralph_core::protected_files::ProtectedFilesCache;
use ralph_core::types::ToolCall;

#[derive(Parser)]
#[command(name = "ralph", about = "Tool dispatch & policy core for an interactive AI-agent CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Executes a batch of tool calls read from a JSON file.
    Run {
        /// Path to a JSON array of tool calls.
        batch_path: PathBuf,

        /// Disables all approval gates.
        #[arg(long)]
        yolo: bool,

        /// Sets a gate category's action to "allow" for this run.
        #[arg(long = "allow-category", value_name = "CATEGORY")]
        allow_category: Vec<String>,

        /// Pre-seeds the session allowlist, `tool:spec` (see `spec.md` §6).
        #[arg(long = "allow", value_name = "TOOL:SPEC")]
        allow: Vec<String>,

        /// Suppresses re-running/re-approving identical calls within a
        /// batch, reusing the first result.
        #[arg(long)]
        compact: bool,
    },
    /// Internal: runs as a re-exec'd subagent, reading its batch from
    /// stdin and proxying gated prompts to its parent over inherited fds
    /// 3 (request) and 4 (response). Not meant to be invoked directly.
    #[command(hide = true)]
    SubagentWorker,
}

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RALPH_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run { batch_path, yolo, allow_category, allow, compact } => {
            run_batch(&batch_path, yolo, &allow_category, &allow, compact)?
        }
        Command::SubagentWorker => subagent_worker::run(),
    };
    std::process::exit(code);
}

fn run_batch(
    batch_path: &PathBuf,
    yolo: bool,
    allow_category: &[String],
    allow: &[String],
    compact: bool,
) -> anyhow::Result<i32> {
    use anyhow::Context;

    let batch_json = std::fs::read_to_string(batch_path)
        .with_context(|| format!("failed to read batch file at {}", batch_path.display()))?;
    let batch: Vec<ToolCall> = serde_json::from_str(&batch_json)
        .context("batch file is not a valid JSON array of tool calls")?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut config = GateConfig::new();
    {
        // Layer disk config, then CLI overrides on top, matching
        // `spec.md` §6's precedence (CLI flags win).
        let loaded = ralph_core::config::load_gate_config(&cwd);
        config.enabled = loaded.enabled;
        config.categories = loaded.categories;
        config.allowlist = loaded.allowlist;
    }
    for category in allow_category {
        config.apply_allow_category(category);
    }
    for spec in allow {
        config.apply_allow_arg(spec);
    }
    if yolo {
        config.apply_yolo();
    }

    let candidate_roots = vec![
        cwd.join("ralph.config.json").to_string_lossy().into_owned(),
        cwd.join(".env").to_string_lossy().into_owned(),
        cwd.join(".ralph").join("config.json").to_string_lossy().into_owned(),
    ];
    let protected_files = ProtectedFilesCache::with_defaults(candidate_roots);
    let registry = ralph_tools::build_registry();

    let cancelled = Arc::new(AtomicBool::new(false));
    install_ctrl_c_handler(Arc::clone(&cancelled));

    let prompter = GatePrompter::new();
    // Fields a subagent's forwarded approval requests through this same
    // prompter as the batch runs (`spec.md` §4.11); `ralph_tools::subagent`
    // hands over the pipe ends of every subagent spawned since the last
    // drain.
    let mut multiplexer = ApprovalMultiplexer::new();
    let mut executor = BatchExecutor::new(&mut config, &protected_files, &registry, &cancelled)
        .with_compact(compact)
        .with_multiplexer(&mut multiplexer)
        .with_new_subagent_channels(ralph_tools::subagent::take_pending_channels);
    if let Some(p) = prompter.as_ref() {
        executor = executor.with_prompter(p);
    }

    let results = executor.execute_batch(&batch, |event| {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    });

    let aborted = results.iter().any(|r| r.result.contains(r#""error":"aborted"#));
    let interrupted = results.iter().any(|r| r.result.contains(r#""error":"interrupted"#));

    let line = serde_json::to_string(&results).context("failed to serialize batch results")?;
    println!("{line}");

    Ok(if aborted {
        -1
    } else if interrupted {
        -2
    } else {
        0
    })
}

fn install_ctrl_c_handler(cancelled: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(_) => return,
        };
        runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancelled.store(true, Ordering::SeqCst);
            }
        });
    });
}
