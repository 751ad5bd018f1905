//! Workspace file commands: ls, cat, write, rm, mkdir, search.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::io::Read;

use workcell::files::{FileEntry, SearchMatch};

use super::Workbench;

pub(crate) async fn ls(bench: &Workbench, project: &str, path: &str, recursive: bool) -> Result<()> {
    let container_id = bench.container_id(project)?;
    let entries = bench
        .mediator()
        .list_files(&container_id, path, recursive)
        .await?;
    print!("{}", format_entries(&entries));
    Ok(())
}

pub(crate) async fn cat(bench: &Workbench, project: &str, path: &str) -> Result<()> {
    let container_id = bench.container_id(project)?;
    let file = bench.mediator().read_file(&container_id, path).await?;
    print!("{}", file.content);
    Ok(())
}

/// Write `content`, or stdin when none is given.
pub(crate) async fn write(
    bench: &Workbench,
    project: &str,
    path: &str,
    content: Option<String>,
) -> Result<()> {
    let content = match content {
        Some(content) => content,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read content from stdin")?;
            buffer
        }
    };

    let container_id = bench.container_id(project)?;
    bench
        .mediator()
        .write_file(&container_id, path, &content)
        .await?;
    println!("{} Wrote {} ({} bytes)", "✓".green(), path, content.len());
    Ok(())
}

pub(crate) async fn rm(bench: &Workbench, project: &str, path: &str) -> Result<()> {
    let container_id = bench.container_id(project)?;
    bench.mediator().delete_file(&container_id, path).await?;
    println!("{} Deleted {}", "✓".green(), path);
    Ok(())
}

pub(crate) async fn mkdir(bench: &Workbench, project: &str, path: &str) -> Result<()> {
    let container_id = bench.container_id(project)?;
    bench
        .mediator()
        .create_directory(&container_id, path)
        .await?;
    println!("{} Created {}/", "✓".green(), path);
    Ok(())
}

pub(crate) async fn search(
    bench: &Workbench,
    project: &str,
    query: &str,
    glob: Option<&str>,
) -> Result<()> {
    let container_id = bench.container_id(project)?;
    let matches = bench
        .mediator()
        .search_files(&container_id, query, glob)
        .await?;
    print!("{}", format_matches(&matches));
    Ok(())
}

fn format_entries(entries: &[FileEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if entry.is_directory {
            let _ = writeln!(&mut out, "{}/", entry.path.blue().bold());
        } else {
            let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
            let _ = writeln!(&mut out, "{} {}", entry.path, size.dimmed());
        }
    }
    out
}

fn format_matches(matches: &[SearchMatch]) -> String {
    let mut out = String::new();
    for m in matches {
        let _ = writeln!(
            &mut out,
            "{}:{}: {}",
            m.path.magenta(),
            m.line_number.to_string().green(),
            m.content
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_entries() {
        colored::control::set_override(false);
        let entries = vec![
            FileEntry {
                name: "src".to_string(),
                path: "src".to_string(),
                is_directory: true,
                size: None,
            },
            FileEntry {
                name: "app.py".to_string(),
                path: "app.py".to_string(),
                is_directory: false,
                size: Some(12),
            },
        ];
        assert_eq!(format_entries(&entries), "src/\napp.py 12\n");
    }

    #[test]
    fn test_format_matches() {
        colored::control::set_override(false);
        let matches = vec![SearchMatch {
            path: "app.py".to_string(),
            line_number: 3,
            content: "print('hi')".to_string(),
        }];
        assert_eq!(format_matches(&matches), "app.py:3: print('hi')\n");
    }
}
