//! Command-line interface: sandbox lifecycle, workspace files, git, and agent turns.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use workcell::agent::ProjectContext;
use workcell::config::CONFIG_FILE;

mod commands;
mod state;

use commands::git::GitAction;
use commands::sandbox::Seed;
use commands::Workbench;

#[derive(Parser)]
#[command(name = "workcell")]
#[command(
    author,
    version,
    about = "Per-project container sandboxes with a tool-using coding agent"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox for a project
    Create {
        /// Project id (a new UUID when omitted)
        #[arg(short, long)]
        project: Option<String>,

        /// Git remote to clone into the workspace
        #[arg(short, long, conflicts_with = "blank")]
        repo: Option<String>,

        /// Default branch of the project
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Start from an empty repository instead of a clone
        #[arg(long)]
        blank: bool,
    },

    /// Start a stopped sandbox
    Start { project: String },

    /// Stop a running sandbox, keeping its files
    Stop { project: String },

    /// Remove a sandbox's container
    Destroy {
        project: String,

        /// Also remove the workspace volume
        #[arg(long)]
        volume: bool,
    },

    /// Show sandbox status (all sandboxes when no project is given)
    Status { project: Option<String> },

    /// Pull the latest changes from origin into the workspace
    Sync {
        project: String,

        /// Branch to pull (the sandbox's branch by default)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Run a command inside a sandbox
    Exec {
        project: String,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Working directory inside the sandbox
        #[arg(short, long)]
        workdir: Option<String>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// List workspace files
    Ls {
        project: String,

        #[arg(default_value = ".")]
        path: String,

        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a workspace file
    Cat { project: String, path: String },

    /// Write a workspace file from --content or stdin
    Write {
        project: String,
        path: String,

        #[arg(long)]
        content: Option<String>,
    },

    /// Delete a workspace file or directory
    Rm { project: String, path: String },

    /// Create a workspace directory
    Mkdir { project: String, path: String },

    /// Search workspace file contents
    Search {
        project: String,

        /// Extended regular expression
        query: String,

        /// Only search files matching this glob, e.g. '*.py'
        #[arg(short, long)]
        glob: Option<String>,
    },

    /// Git operations in the workspace
    Git {
        project: String,

        #[command(subcommand)]
        action: GitCommand,
    },

    /// Run one agent turn and print its events as JSON lines
    Chat {
        project: String,

        /// The user message
        message: String,

        /// JSON file with earlier conversation messages
        #[arg(long)]
        history: Option<PathBuf>,

        /// Project description for the system prompt
        #[arg(long)]
        description: Option<String>,

        /// Project type for the system prompt, e.g. "api"
        #[arg(long = "type")]
        project_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum GitCommand {
    /// Show modified, staged and untracked files
    Status,

    /// Show unstaged changes
    Diff { path: Option<String> },

    /// Create and switch to a branch
    Branch { name: String },

    /// Stage everything, commit, and push
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// Open a GitHub pull request from the current branch
    Pr {
        #[arg(short, long)]
        title: String,

        #[arg(long, default_value = "")]
        body: String,

        #[arg(long, default_value = "main")]
        base: String,
    },
}

impl From<GitCommand> for GitAction {
    fn from(command: GitCommand) -> Self {
        match command {
            GitCommand::Status => Self::Status,
            GitCommand::Diff { path } => Self::Diff { path },
            GitCommand::Branch { name } => Self::Branch { name },
            GitCommand::Commit { message } => Self::Commit { message },
            GitCommand::Pr { title, body, base } => Self::PullRequest { title, body, base },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose {
        EnvFilter::new("workcell=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("workcell=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let bench = Workbench::open(&cli.config).await?;

    match cli.command {
        Commands::Create {
            project,
            repo,
            branch,
            blank,
        } => {
            let seed = if blank {
                Seed::Blank
            } else {
                Seed::Clone { repo, branch }
            };
            commands::sandbox::create(&bench, project, seed).await?;
        }
        Commands::Start { project } => {
            commands::sandbox::start(&bench, &project).await?;
        }
        Commands::Stop { project } => {
            commands::sandbox::stop(&bench, &project).await?;
        }
        Commands::Destroy { project, volume } => {
            commands::sandbox::destroy(&bench, &project, volume).await?;
        }
        Commands::Status { project } => {
            commands::sandbox::status(&bench, project.as_deref()).await?;
        }
        Commands::Sync { project, branch } => {
            commands::sandbox::sync(&bench, &project, branch.as_deref()).await?;
        }
        Commands::Exec {
            project,
            timeout,
            workdir,
            command,
        } => {
            commands::sandbox::exec(&bench, &project, &command, timeout, workdir.as_deref())
                .await?;
        }
        Commands::Ls {
            project,
            path,
            recursive,
        } => {
            commands::files::ls(&bench, &project, &path, recursive).await?;
        }
        Commands::Cat { project, path } => {
            commands::files::cat(&bench, &project, &path).await?;
        }
        Commands::Write {
            project,
            path,
            content,
        } => {
            commands::files::write(&bench, &project, &path, content).await?;
        }
        Commands::Rm { project, path } => {
            commands::files::rm(&bench, &project, &path).await?;
        }
        Commands::Mkdir { project, path } => {
            commands::files::mkdir(&bench, &project, &path).await?;
        }
        Commands::Search {
            project,
            query,
            glob,
        } => {
            commands::files::search(&bench, &project, &query, glob.as_deref()).await?;
        }
        Commands::Git { project, action } => {
            commands::git::run(&bench, &project, action.into()).await?;
        }
        Commands::Chat {
            project,
            message,
            history,
            description,
            project_type,
        } => {
            let context = ProjectContext {
                name: project,
                description,
                project_type,
            };
            commands::chat::run(&bench, context, &message, history.as_deref()).await?;
        }
    }

    Ok(())
}
