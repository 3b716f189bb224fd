mod cmd_config;
mod cmd_enable;
mod cmd_explain;
mod cmd_hook;
mod cmd_rewind;
mod cmd_status;
mod githooks;
mod settings;
mod workspace;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use entire_core::StrategyKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "entire",
    version,
    about = "Checkpoints and rewind for AI coding agent sessions"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Turn on checkpointing and install git and agent hooks
    Enable {
        /// manual-commit (default) or auto-commit
        #[arg(long)]
        strategy: Option<StrategyKind>,
        /// Agent whose hooks to install (e.g. claude-code, gemini)
        #[arg(long)]
        agent: Option<String>,
    },
    /// Turn off checkpointing and remove installed hooks
    Disable,
    /// Show settings, hooks and sessions for this repository
    Status,
    /// List rewind points, or restore the working tree to one
    Rewind {
        /// Checkpoint id or snapshot commit to restore
        id: Option<String>,
        /// List rewind points instead of restoring
        #[arg(long)]
        list: bool,
        /// Output the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what a checkpoint recorded
    Explain {
        /// 12-hex checkpoint id
        id: String,
        /// Output metadata as JSON
        #[arg(long)]
        json: bool,
        /// Print the full stored transcript
        #[arg(long)]
        full: bool,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
    /// Agent hook entrypoint (called by the agent's hook configuration)
    Hook {
        /// Agent name (claude-code, gemini)
        agent: String,
        /// Native hook name
        hook: String,
    },
    /// Git hook entrypoint (called by the installed git hook shims)
    GitHook {
        #[command(subcommand)]
        cmd: GitHookCmd,
    },
}

#[derive(Subcommand)]
enum GitHookCmd {
    PrepareCommitMsg {
        msg_file: PathBuf,
        source: Option<String>,
        sha: Option<String>,
    },
    CommitMsg {
        msg_file: PathBuf,
    },
    PostCommit,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ENTIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.cmd {
        Command::Enable { strategy, agent } => cmd_enable::enable(&cwd, strategy, agent.as_deref()),
        Command::Disable => cmd_enable::disable(&cwd),
        Command::Status => cmd_status::execute(&cwd),
        Command::Rewind { id, list, json } => cmd_rewind::execute(&cwd, id.as_deref(), list, json),
        Command::Explain { id, json, full } => cmd_explain::execute(&cwd, &id, json, full),
        Command::Config { cmd } => cmd_config::run(cmd, &cwd),
        Command::Hook { agent, hook } => cmd_hook::agent_hook(&cwd, &agent, &hook),
        Command::GitHook { cmd } => match cmd {
            GitHookCmd::PrepareCommitMsg {
                msg_file, source, ..
            } => cmd_hook::prepare_commit_msg(&cwd, &msg_file, source.as_deref()),
            GitHookCmd::CommitMsg { msg_file } => cmd_hook::commit_msg(&cwd, &msg_file),
            GitHookCmd::PostCommit => cmd_hook::post_commit(&cwd),
        },
    }
}
