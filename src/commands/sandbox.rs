//! Sandbox lifecycle commands: create, start, stop, destroy, status, sync, exec.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::time::Duration;
use tracing::warn;

use workcell::sandbox::{short_id, ContainerStatus, Sandbox, SandboxStatus};

use super::Workbench;

/// How a new sandbox's workspace is seeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seed {
    /// `git init` on main.
    Blank,
    /// Clone a remote, or leave the workspace empty.
    Clone { repo: Option<String>, branch: String },
}

pub(crate) async fn create(bench: &Workbench, project: Option<String>, seed: Seed) -> Result<()> {
    let project = project.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut store = bench.store()?;
    if store.sandboxes.contains_key(&project) {
        anyhow::bail!("A sandbox for '{project}' already exists");
    }

    let sandbox = match seed {
        Seed::Blank => bench.manager.create_blank(&project).await?,
        Seed::Clone { repo, branch } => {
            bench
                .manager
                .create_from_clone(&project, repo.as_deref(), &branch)
                .await?
        }
    };

    print!("{}", format_created(&sandbox));
    store.insert(sandbox);
    bench.save(&store)
}

pub(crate) async fn start(bench: &Workbench, project: &str) -> Result<()> {
    transition(bench, project, Transition::Start).await
}

pub(crate) async fn stop(bench: &Workbench, project: &str) -> Result<()> {
    transition(bench, project, Transition::Stop).await
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Start,
    Stop,
}

async fn transition(bench: &Workbench, project: &str, transition: Transition) -> Result<()> {
    let mut store = bench.store()?;
    let sandbox = store.get_mut(project)?;
    let outcome = match transition {
        Transition::Start => bench.manager.start(sandbox).await,
        Transition::Stop => bench.manager.stop(sandbox).await,
    };
    let status = sandbox.status;
    // Persist an Error status even when the engine call failed
    bench.save(&store)?;
    outcome?;

    println!("{} {} is {}", "✓".green(), project, status.to_string().cyan());
    Ok(())
}

/// Remove the container, and the volume too when `with_volume` is set.
pub(crate) async fn destroy(bench: &Workbench, project: &str, with_volume: bool) -> Result<()> {
    let mut store = bench.store()?;

    if with_volume {
        let sandbox = store.get_mut(project)?;
        if let Err(e) = bench.manager.destroy(sandbox).await {
            bench.save(&store)?;
            return Err(e.into());
        }
    } else {
        let sandbox = store.get(project)?;
        let container_id = sandbox.container_id.clone().unwrap_or_default();
        bench.manager.destroy_container(&container_id, None).await?;
        warn!("Volume {} kept", sandbox.volume_name);
    }

    store.remove(project);
    bench.save(&store)?;
    println!("{} Destroyed sandbox for {}", "✓".green(), project);
    Ok(())
}

/// Show one project's container state, or every known sandbox.
pub(crate) async fn status(bench: &Workbench, project: Option<&str>) -> Result<()> {
    let store = bench.store()?;
    let sandboxes: Vec<&Sandbox> = match project {
        Some(project) => vec![store.get(project)?],
        None => store.sandboxes.values().collect(),
    };

    if sandboxes.is_empty() {
        println!("\n{} No sandboxes found.", "ℹ".blue());
        println!("  Run {} to create one.", "workcell create".green());
        return Ok(());
    }

    for sandbox in sandboxes {
        let observed = match sandbox.container_id.as_deref() {
            Some(id) => bench.manager.status(id).await?,
            None => ContainerStatus::not_found(),
        };
        print!("{}", format_status(sandbox, &observed));
    }
    Ok(())
}

pub(crate) async fn sync(bench: &Workbench, project: &str, branch: Option<&str>) -> Result<()> {
    let store = bench.store()?;
    let sandbox = store.get(project)?;
    let container_id = store.container_id(project)?;
    let branch = branch.unwrap_or(&sandbox.git_branch);

    let result = bench.manager.sync_repo(&container_id, branch).await?;
    if !result.success() {
        anyhow::bail!("git pull failed: {}", result.error_output());
    }
    print!("{}", result.stdout);
    Ok(())
}

pub(crate) async fn exec(
    bench: &Workbench,
    project: &str,
    command: &[String],
    timeout_secs: Option<u64>,
    workdir: Option<&str>,
) -> Result<()> {
    let argv = command_argv(command)?;
    let container_id = bench.container_id(project)?;
    let timeout = timeout_secs.map_or_else(
        || bench.manager.default_exec_timeout(),
        Duration::from_secs,
    );

    let result = bench
        .manager
        .exec_command(&container_id, &argv, timeout, workdir)
        .await?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    if result.is_timeout() {
        anyhow::bail!("Command timed out after {}s", timeout.as_secs());
    }
    if !result.success() {
        anyhow::bail!("Command exited with code {}", result.exit_code);
    }
    Ok(())
}

/// A single argument with whitespace is split shell-style, so
/// `exec demo "ls -la src"` works like `exec demo -- ls -la src`.
fn command_argv(command: &[String]) -> Result<Vec<String>> {
    match command {
        [single] if single.contains(char::is_whitespace) => {
            let argv = shell_words::split(single)?;
            if argv.is_empty() {
                anyhow::bail!("Empty command");
            }
            Ok(argv)
        }
        [] => anyhow::bail!("Empty command"),
        _ => Ok(command.to_vec()),
    }
}

fn format_created(sandbox: &Sandbox) -> String {
    let mut out = String::new();
    let container = sandbox.container_id.as_deref().map_or("-", short_id);
    let _ = writeln!(
        &mut out,
        "\n{} Sandbox created for {}",
        "✓".green(),
        sandbox.project_id.cyan()
    );
    let _ = writeln!(&mut out, "  Container:  {}", container.cyan());
    let _ = writeln!(&mut out, "  Volume:     {}", sandbox.volume_name.cyan());
    let _ = writeln!(&mut out, "  Branch:     {}", sandbox.git_branch.cyan());
    out
}

fn format_status(sandbox: &Sandbox, observed: &ContainerStatus) -> String {
    let mut out = String::new();
    let recorded = match sandbox.status {
        SandboxStatus::Running => sandbox.status.to_string().green().bold(),
        SandboxStatus::Error => sandbox.status.to_string().red().bold(),
        _ => sandbox.status.to_string().yellow(),
    };

    let _ = writeln!(&mut out, "\n{}", sandbox.project_id.bold());
    let _ = writeln!(&mut out, "  Status:     {recorded}");
    let _ = writeln!(
        &mut out,
        "  Container:  {} ({})",
        observed.short_id.as_deref().unwrap_or("-").cyan(),
        observed.state.to_string().cyan()
    );
    let _ = writeln!(&mut out, "  Volume:     {}", sandbox.volume_name.cyan());
    let _ = writeln!(&mut out, "  Branch:     {}", sandbox.git_branch.cyan());
    let _ = writeln!(
        &mut out,
        "  Limits:     {} cpu, {} MiB memory, {} MiB disk",
        sandbox.limits.cpus, sandbox.limits.memory_mb, sandbox.limits.disk_mb
    );
    let _ = writeln!(
        &mut out,
        "  Created:    {}",
        sandbox
            .created_at
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
            .cyan()
    );
    out
}
