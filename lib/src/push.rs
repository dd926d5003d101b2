//! Optional push of the output directory to a remote repository.
//!
//! Before any byte leaves the machine, every emitted file is re-scanned
//! for residual secrets; a single hit aborts the push. This is the
//! second gate on top of the snapshot-level redaction pass.

use std::io::Write as _;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::redact::find_residual_secret;
use crate::task::Task;

/// Scan every file under `dir`; return the first residual secret found.
pub(crate) fn rescan_output(dir: &Utf8Path) -> Result<Option<(Utf8PathBuf, &'static str)>> {
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path()).context("Non-UTF8 output path")?;
        let buf = std::fs::read(&path).with_context(|| format!("Reading {path}"))?;
        let text = String::from_utf8_lossy(&buf);
        if let Some(class) = find_residual_secret(&text) {
            return Ok(Some((path, class)));
        }
    }
    Ok(None)
}

fn total_size(dir: &Utf8Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

/// Create the remote repository (private unless `public`) and push the
/// output directory to it.
#[context("Pushing output to {repo}")]
pub(crate) fn push_to_github(
    output_dir: &Utf8Path,
    repo: &str,
    public: bool,
    yes: bool,
    token: Option<&str>,
) -> Result<()> {
    if let Some((path, class)) = rescan_output(output_dir)? {
        anyhow::bail!(
            "Residual secret ({class}) detected in {path}; refusing to push. \
             Extend the redaction patterns or remove the file, then retry."
        );
    }

    let size_kib = total_size(output_dir) / 1024;
    if !yes {
        let ok = confirm(&format!(
            "Push {size_kib} KiB from {output_dir} to github.com/{repo}?"
        ))?;
        if !ok {
            anyhow::bail!("Push aborted");
        }
    }

    let git = |desc: &str, args: &[&str]| -> Result<()> {
        Task::new(desc, "git")
            .args(["-C", output_dir.as_str()])
            .args(args)
            .run()
    };
    if !output_dir.join(".git").exists() {
        git("Initializing repository", &["init", "-b", "main"])?;
    }
    git("Staging output", &["add", "-A"])?;
    // Committing an unchanged tree fails; that's fine on re-push.
    let _ = git("Committing output", &["commit", "-m", "Inspection output"]);

    let visibility = if public { "--public" } else { "--private" };
    let mut create = Task::new("Creating remote repository", "gh");
    create.cmd.current_dir(output_dir);
    if let Some(token) = token {
        create.cmd.env("GH_TOKEN", token);
    }
    create
        .args(["repo", "create", repo, visibility, "--source", ".", "--push"])
        .verbose()
        .run()
        .context("Creating and pushing the remote repository (does it already exist?)")?;
    println!("Pushed to https://github.com/{repo}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescan_detects_planted_secret() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(td.path()).unwrap();
        std::fs::write(dir.join("clean.md"), "nothing secret here\n")?;
        std::fs::write(dir.join("leaky.conf"), "password = hunter2\n")?;
        let hit = rescan_output(dir)?;
        let (path, class) = hit.expect("must detect the planted secret");
        assert!(path.as_str().ends_with("leaky.conf"));
        assert_eq!(class, "password");
        Ok(())
    }

    #[test]
    fn rescan_accepts_redaction_tokens() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(td.path()).unwrap();
        std::fs::write(dir.join("ok.conf"), "password = REDACTED_password_ab12cd34\n")?;
        assert!(rescan_output(dir)?.is_none());
        Ok(())
    }
}
