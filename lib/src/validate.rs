//! Optional build validation: run the generated recipe through a
//! container build and capture failures.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use reimage_utils::CommandRunExt;

use crate::hostexec::HostBridge;
use crate::task::Task;
use crate::warnings::WarningSink;

const SOURCE: &str = "validate";

/// Resolve the host-side path of a directory that was bind-mounted into
/// this container, from the mount table. Returns `None` when the path is
/// not under a bind mount we can translate.
pub(crate) fn host_path_of(mountinfo: &str, path: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut best: Option<(&str, &str)> = None;
    for line in mountinfo.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // fields: id parent major:minor root mountpoint ...
        let (Some(root), Some(mountpoint)) = (fields.get(3), fields.get(4)) else {
            continue;
        };
        if path.as_str().starts_with(mountpoint)
            && best.map_or(true, |(_, b)| mountpoint.len() > b.len())
        {
            best = Some((root, mountpoint));
        }
    }
    let (root, mountpoint) = best?;
    let rel = path.as_str().strip_prefix(mountpoint)?.trim_start_matches('/');
    let mut host = Utf8PathBuf::from(root);
    if !rel.is_empty() {
        host.push(rel);
    }
    Some(host)
}

/// Build the recipe with `--no-cache`. A failure is a warning, not a
/// fatal error; the captured log is returned for `build-errors.log`.
pub(crate) async fn validate_build(
    bridge: &HostBridge,
    output_dir: &Utf8Path,
    warnings: &WarningSink,
) -> Result<Option<String>> {
    // Prefer a runtime inside the inspection container; fall back to the
    // host runtime through the bridge, translating the output path.
    let local = std::process::Command::new("podman")
        .arg("--version")
        .run_get_string()
        .is_ok();
    let result = if local {
        let out = Task::new("Validating the generated Containerfile", "podman")
            .args([
                "build",
                "--no-cache",
                "-f",
                output_dir.join("Containerfile").as_str(),
                output_dir.as_str(),
            ])
            .read_lenient();
        match out {
            Ok(log) => check_log(log),
            Err(e) => Err(e),
        }
    } else if bridge.available() {
        let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")
            .context("Reading mount table")?;
        let Some(host_dir) = host_path_of(&mountinfo, output_dir) else {
            warnings.info(
                SOURCE,
                "Cannot translate the output directory to a host path; validation skipped",
            );
            return Ok(None);
        };
        let o = bridge
            .run_in_host_namespaces(&[
                "podman",
                "build",
                "--no-cache",
                "-f",
                host_dir.join("Containerfile").as_str(),
                host_dir.as_str(),
            ])
            .await?;
        if o.success {
            Ok(o.stdout)
        } else {
            Err(anyhow::anyhow!("{}", o.stderr))
        }
    } else {
        warnings.info(SOURCE, "No container runtime reachable; validation skipped");
        return Ok(None);
    };

    match result {
        Ok(_) => {
            println!("Validation build succeeded");
            Ok(None)
        }
        Err(e) => {
            warnings.warn(
                SOURCE,
                format!("Validation build failed; see build-errors.log ({e:#})"),
            );
            Ok(Some(format!("{e:#}\n")))
        }
    }
}

fn check_log(log: String) -> Result<String> {
    // podman's exit status was swallowed by read_lenient; treat an
    // explicit error marker as failure so we keep the full log.
    if log.lines().any(|l| l.starts_with("Error:")) {
        anyhow::bail!("{log}");
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountinfo_translation() {
        let mountinfo = "\
36 25 0:31 / /proc rw,nosuid - proc proc rw\n\
612 596 253:0 /home/mark/output /output rw,relatime - xfs /dev/mapper/root rw\n";
        assert_eq!(
            host_path_of(mountinfo, Utf8Path::new("/output")).as_deref(),
            Some(Utf8Path::new("/home/mark/output"))
        );
        assert_eq!(
            host_path_of(mountinfo, Utf8Path::new("/output/sub")).as_deref(),
            Some(Utf8Path::new("/home/mark/output/sub"))
        );
    }
}
