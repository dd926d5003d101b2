//! # Host inspection CLI
//!
//! Command line surface and pipeline orchestration: probe, resolve the
//! baseline, run the inspectors, seal the snapshot, render, and handle
//! the optional validation and push paths.

use std::ffi::OsString;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use fn_error_context::context;

use crate::baseline;
use crate::hostexec::{HostBridge, EXEC_SENTINEL};
use crate::inspect::{self, InspectContext, InspectOptions, LiveData};
use crate::redact;
use crate::render;
use crate::snapshot::{HostInfo, Snapshot, SNAPSHOT_FILENAME};
use crate::warnings::WarningSink;

/// Inspect a package-managed host and produce a bootable-container
/// build recipe.
///
/// The host root is expected read-only at `--host-root` (a conventional
/// container bind mount). All artifacts are written under
/// `--output-dir`: a Containerfile, a mirrored configuration tree, an
/// audit report, a self-contained HTML dashboard, a kickstart fragment,
/// a secrets review, and the inspection snapshot itself.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "reimage", rename_all = "kebab-case", version)]
pub(crate) struct Opt {
    /// Directory into which all artifacts are written (created if missing).
    #[clap(long, short = 'o', default_value = "./output")]
    pub(crate) output_dir: Utf8PathBuf,

    /// Path at which the host root is mounted.
    #[clap(long, default_value = "/host")]
    pub(crate) host_root: Utf8PathBuf,

    /// Load a previously sealed snapshot from this file and skip
    /// inspection entirely (re-render mode).
    #[clap(long)]
    pub(crate) from_snapshot: Option<Utf8PathBuf>,

    /// Run inspection, seal and save the snapshot, and stop before any
    /// renderer runs.
    #[clap(long, conflicts_with = "from_snapshot")]
    pub(crate) inspect_only: bool,

    /// Override the auto-detected base image version (e.g. `9.6`).
    #[clap(long)]
    pub(crate) target_version: Option<String>,

    /// Override the base image reference entirely; wins over
    /// `--target-version` and the automatic mapping.
    #[clap(long)]
    pub(crate) target_image: Option<String>,

    /// Newline-separated package-name list to use as the baseline
    /// (air-gapped mode; bypasses the image query).
    #[clap(long)]
    pub(crate) baseline_packages: Option<Utf8PathBuf>,

    /// Diff modified package-owned configs against the package-shipped
    /// originals (requires the package archives in the local cache).
    #[clap(long)]
    pub(crate) config_diffs: bool,

    /// Scan entire binaries for version strings instead of only the
    /// leading prefix. Slow on large statically linked binaries.
    #[clap(long)]
    pub(crate) deep_binary_scan: bool,

    /// Enumerate live containers through the host container runtime.
    #[clap(long)]
    pub(crate) query_podman: bool,

    /// After rendering, build the recipe through a container runtime and
    /// capture failures in build-errors.log.
    #[clap(long)]
    pub(crate) validate: bool,

    /// Push the output directory to this GitHub repository
    /// (`owner/repo`). Triggers a second secret scan and a confirmation.
    #[clap(long)]
    pub(crate) push_to_github: Option<String>,

    /// Personal access token for repository creation; falls back to the
    /// GITHUB_TOKEN environment variable.
    #[clap(long)]
    pub(crate) github_token: Option<String>,

    /// Create the remote repository as public (default private).
    #[clap(long)]
    pub(crate) public: bool,

    /// Skip interactive confirmation prompts.
    #[clap(long, short = 'y')]
    pub(crate) yes: bool,

    /// Bypass the privilege probe. Inspection then degrades to
    /// all-packages mode unless a baseline list is supplied.
    #[clap(long)]
    pub(crate) skip_preflight: bool,

    /// Wall-clock bound on any call through the privilege bridge.
    #[clap(long, default_value_t = crate::hostexec::DEFAULT_TIMEOUT.as_secs())]
    pub(crate) bridge_timeout_secs: u64,
}

/// Parse the provided arguments and execute.
pub async fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.into()).collect();
    // The privilege bridge re-invokes this binary with a hidden sentinel
    // that must bypass clap entirely.
    if args.get(1).and_then(|a| a.to_str()) == Some(EXEC_SENTINEL) {
        return crate::hostexec::exec_in_host_namespaces(&args[2..]);
    }
    run(Opt::parse_from(args)).await
}

/// Probe the host identity from its OS-release file.
#[context("Probing host identity")]
fn probe_host(host_root: &Utf8Path, warnings: &WarningSink) -> Result<HostInfo> {
    if !host_root.try_exists()? {
        anyhow::bail!(
            "Host root {host_root} is not present; mount the host with -v /:{host_root}:ro"
        );
    }
    let hostname = std::fs::read_to_string(host_root.join("etc/hostname"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    let (distro, distro_id, version_id) =
        match os_release::OsRelease::new_from(host_root.join("etc/os-release")) {
            Ok(osrel) => (osrel.name, osrel.id, osrel.version_id),
            Err(e) => {
                warnings.warn(
                    "host",
                    format!("Could not read os-release ({e}); distribution unknown"),
                );
                ("unknown".into(), "unknown".into(), "0".into())
            }
        };
    let major = version_id
        .split('.')
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Ok(HostInfo {
        hostname,
        distro,
        distro_id,
        version_id,
        major,
        arch: std::env::consts::ARCH.to_string(),
        inspected_at: chrono::Utc::now(),
    })
}

/// Prefetch everything inspectors need from the host's namespaces, so
/// the inspectors themselves never cross the boundary.
async fn prefetch_live(bridge: &HostBridge, opts: &InspectOptions) -> LiveData {
    let mut live = LiveData::default();
    if !bridge.available() {
        return live;
    }
    live.routes = bridge.read_in_host_namespaces(&["ip", "route"]).await.ok();
    live.route_rules = bridge.read_in_host_namespaces(&["ip", "rule"]).await.ok();
    if opts.query_podman {
        live.podman_ps = bridge
            .read_in_host_namespaces(&["podman", "ps", "--all", "--format", "json"])
            .await
            .ok();
    }
    live
}

/// The inspection half: probe, resolve, collect, redact, seal.
async fn inspect_host(opt: &Opt, bridge: &HostBridge) -> Result<Snapshot> {
    let warnings = WarningSink::new();
    let host = probe_host(&opt.host_root, &warnings)?;
    println!(
        "Inspecting {} ({} {})",
        host.hostname, host.distro, host.version_id
    );

    let resolved = baseline::resolve_baseline(
        bridge,
        &host,
        opt.target_version.as_deref(),
        opt.target_image.as_deref(),
        opt.baseline_packages.as_deref(),
        &warnings,
    )
    .await?;

    let opts = InspectOptions {
        config_diffs: opt.config_diffs,
        deep_binary_scan: opt.deep_binary_scan,
        query_podman: opt.query_podman,
    };
    let live = prefetch_live(bridge, &opts).await;

    let mut snapshot = Snapshot::new();
    snapshot.host = Some(host);
    snapshot.target = resolved.target.clone();
    snapshot.baseline = Some(resolved.baseline.clone());

    let ctx = InspectContext::new(
        opt.host_root.clone(),
        opts,
        resolved.baseline,
        warnings.clone(),
        live,
    )?;
    inspect::run_all(&ctx, &mut snapshot);

    // The safety gate: no artifact may be written before this completes.
    redact::seal(&mut snapshot, &warnings)?;
    snapshot.warnings = warnings.seal();
    Ok(snapshot)
}

fn print_summary(snapshot: &Snapshot, output_dir: &Utf8Path) {
    use comfy_table::Table;
    let t = render::triage(snapshot);
    let mut table = Table::new();
    table.set_header(vec!["", "Count"]);
    if let Some(p) = snapshot.packages.as_ref() {
        table.add_row(vec!["Packages added".to_string(), p.added.len().to_string()]);
        table.add_row(vec!["Packages removed".to_string(), p.removed.len().to_string()]);
    }
    if let Some(s) = snapshot.services.as_ref() {
        table.add_row(vec!["Service changes".to_string(), s.units.len().to_string()]);
    }
    if let Some(c) = snapshot.configs.as_ref() {
        table.add_row(vec![
            "Config files captured".to_string(),
            (c.modified.len() + c.unowned.len() + c.orphaned.len()).to_string(),
        ]);
    }
    table.add_row(vec![
        "Secrets redacted".to_string(),
        snapshot.secrets_review.len().to_string(),
    ]);
    table.add_row(vec!["Handled automatically".to_string(), t.automatic.to_string()]);
    table.add_row(vec!["Marked FIXME".to_string(), t.fixme.to_string()]);
    table.add_row(vec!["Need manual work".to_string(), t.manual.to_string()]);
    println!("{table}");
    println!("Artifacts written to {output_dir}");
}

async fn run(opt: Opt) -> Result<()> {
    let bridge = HostBridge::new(
        &opt.host_root,
        Duration::from_secs(opt.bridge_timeout_secs),
    );

    let snapshot = if let Some(path) = opt.from_snapshot.as_ref() {
        // Unreadable or unparseable snapshot files are fatal here.
        Snapshot::load(path)?
    } else {
        if !opt.skip_preflight && !bridge.available() {
            anyhow::bail!(
                "Privilege probe failed ({probe}): {guidance}. \
                 Pass --skip-preflight to continue in degraded mode.",
                probe = bridge.probe(),
                guidance = bridge.probe().guidance()
            );
        }
        inspect_host(&opt, &bridge).await?
    };

    if opt.inspect_only {
        std::fs::create_dir_all(&opt.output_dir)
            .with_context(|| format!("Creating {}", opt.output_dir))?;
        let path = opt.output_dir.join(SNAPSHOT_FILENAME);
        std::fs::write(&path, snapshot.to_json()?).with_context(|| format!("Writing {path}"))?;
        println!("Snapshot sealed and saved to {path}");
        return Ok(());
    }

    let rendered = render::render(&snapshot)?;
    render::write_to(&rendered, &opt.output_dir)?;

    if opt.validate {
        let sink = WarningSink::new();
        if let Some(log) =
            crate::validate::validate_build(&bridge, &opt.output_dir, &sink).await?
        {
            let path = opt.output_dir.join("build-errors.log");
            std::fs::write(&path, &log).with_context(|| format!("Writing {path}"))?;
            eprintln!("Validation build failed; log captured in {path}");
        }
        for w in sink.seal() {
            eprintln!("{}: {}", w.source, w.message);
        }
    }

    if let Some(repo) = opt.push_to_github.as_deref() {
        let token = opt
            .github_token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok());
        crate::push::push_to_github(&opt.output_dir, repo, opt.public, opt.yes, token.as_deref())?;
    }

    print_summary(&snapshot, &opt.output_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let o = Opt::try_parse_from(["reimage"]).unwrap();
        assert_eq!(o.output_dir, Utf8PathBuf::from("./output"));
        assert_eq!(o.host_root, Utf8PathBuf::from("/host"));
        assert_eq!(o.bridge_timeout_secs, 120);
        assert!(!o.public);
    }

    #[test]
    fn parse_flags() {
        let o = Opt::try_parse_from([
            "reimage",
            "-o",
            "/tmp/out",
            "--target-version",
            "9.6",
            "--config-diffs",
            "--push-to-github",
            "acme/web01-image",
            "-y",
        ])
        .unwrap();
        assert_eq!(o.output_dir, Utf8PathBuf::from("/tmp/out"));
        assert_eq!(o.target_version.as_deref(), Some("9.6"));
        assert!(o.config_diffs);
        assert_eq!(o.push_to_github.as_deref(), Some("acme/web01-image"));
        assert!(o.yes);
    }

    #[test]
    fn inspect_only_conflicts_with_from_snapshot() {
        assert!(Opt::try_parse_from([
            "reimage",
            "--inspect-only",
            "--from-snapshot",
            "snap.json"
        ])
        .is_err());
    }
}
