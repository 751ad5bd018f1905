//! Git commands on a sandbox workspace.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write as _;

use workcell::files::GitStatus;

use super::Workbench;

/// Git subcommand to run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GitAction {
    Status,
    Diff { path: Option<String> },
    Branch { name: String },
    Commit { message: String },
    PullRequest {
        title: String,
        body: String,
        base: String,
    },
}

pub(crate) async fn run(bench: &Workbench, project: &str, action: GitAction) -> Result<()> {
    let container_id = bench.container_id(project)?;
    let files = bench.mediator();

    match action {
        GitAction::Status => {
            let status = files.git_status(&container_id).await?;
            print!("{}", format_status(&status));
        }
        GitAction::Diff { path } => {
            let diff = files.git_diff(&container_id, path.as_deref()).await?;
            print!("{diff}");
        }
        GitAction::Branch { name } => {
            files.create_branch(&container_id, &name).await?;
            let mut store = bench.store()?;
            store.get_mut(project)?.git_branch.clone_from(&name);
            bench.save(&store)?;
            println!("{} Switched to new branch {}", "✓".green(), name.cyan());
        }
        GitAction::Commit { message } => {
            let sha = files.commit_and_push(&container_id, &message).await?;
            println!(
                "{} Committed {} {}",
                "✓".green(),
                sha.get(..12).unwrap_or(&sha).yellow(),
                message
            );
        }
        GitAction::PullRequest { title, body, base } => {
            let url = files
                .create_pull_request(&container_id, &title, &body, &base)
                .await?;
            println!("{} Pull request created: {}", "✓".green(), url.cyan());
        }
    }
    Ok(())
}

fn format_status(status: &GitStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "On branch {}", status.branch.cyan());
    if !status.has_changes {
        let _ = writeln!(&mut out, "{}", "Working tree clean".dimmed());
        return out;
    }
    for path in &status.staged {
        let _ = writeln!(&mut out, "  {} {}", "staged:   ".green(), path);
    }
    for path in &status.modified {
        let _ = writeln!(&mut out, "  {} {}", "modified: ".yellow(), path);
    }
    for path in &status.untracked {
        let _ = writeln!(&mut out, "  {} {}", "untracked:".red(), path);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status() {
        colored::control::set_override(false);
        let clean = GitStatus {
            branch: "main".to_string(),
            ..GitStatus::default()
        };
        assert_eq!(format_status(&clean), "On branch main\nWorking tree clean\n");

        let dirty = GitStatus {
            branch: "dev".to_string(),
            staged: vec!["a.py".to_string()],
            untracked: vec!["b.py".to_string()],
            has_changes: true,
            ..GitStatus::default()
        };
        assert_eq!(
            format_status(&dirty),
            "On branch dev\n  staged:    a.py\n  untracked: b.py\n"
        );
    }
}
