//! The output-directory README: what was found, how to build, how to
//! deploy, what still needs attention.

use std::fmt::Write as _;

use crate::snapshot::{Provenance, Snapshot};

use super::triage;

pub(crate) fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let t = triage(snapshot);

    let _ = writeln!(out, "# Image migration recipe");
    if let Some(host) = snapshot.host.as_ref() {
        let _ = writeln!(
            out,
            "\nGenerated from **{}** ({} {}) on {}.",
            host.hostname, host.distro, host.version_id, host.inspected_at.to_rfc3339()
        );
    }

    let _ = writeln!(out, "\n## What was found\n");
    let counts = [
        ("packages added", snapshot.packages.as_ref().map(|p| p.added.len())),
        ("packages removed", snapshot.packages.as_ref().map(|p| p.removed.len())),
        ("service state changes", snapshot.services.as_ref().map(|s| s.units.len())),
        (
            "configuration files captured",
            snapshot
                .configs
                .as_ref()
                .map(|c| c.modified.len() + c.unowned.len() + c.orphaned.len()),
        ),
        ("container workloads", snapshot.containers.as_ref().map(|c| c.quadlets.len())),
        ("secrets redacted", Some(snapshot.secrets_review.len())),
        ("warnings", Some(snapshot.warnings.len())),
    ];
    for (label, count) in counts {
        if let Some(count) = count {
            let _ = writeln!(out, "- {count} {label}");
        }
    }
    let _ = writeln!(
        out,
        "\nTriage: {} handled automatically, {} handled with FIXME, {} need manual intervention.",
        t.automatic, t.fixme, t.manual
    );

    let _ = writeln!(out, "\n## Build\n");
    let _ = writeln!(out, "```\npodman build -t my-host-image -f Containerfile .\n```");

    let _ = writeln!(out, "\n## Deploy\n");
    let _ = writeln!(
        out,
        "On a host already running a bootable container image:\n\n\
         ```\nbootc switch <registry>/my-host-image\n```\n\n\
         For a fresh install, embed `kickstart-suggestion.ks` (after review) in your \
         provisioning flow.\n\n\
         Content seeded under `/var` is written only at initial bootstrap and never \
         updated by later image deployments; see the audit report's storage section."
    );

    let mut fixmes: Vec<String> = Vec::new();
    if let Some(np) = snapshot.non_package.as_ref() {
        for item in np.items.iter().filter(|i| i.provenance == Provenance::Unknown) {
            fixmes.push(format!("unknown-provenance artifact /{}", item.path));
        }
    }
    if let Some(sched) = snapshot.scheduled.as_ref() {
        for c in sched.cron.iter().filter(|c| c.on_calendar.is_none()) {
            fixmes.push(format!("non-convertible cron entry in /{}", c.source));
        }
    }
    if let Some(sec) = snapshot.security.as_ref() {
        for m in &sec.custom_modules {
            fixmes.push(format!("SELinux module '{m}' needs its policy source"));
        }
    }
    if !fixmes.is_empty() {
        let _ = writeln!(out, "\n## Before production\n");
        for f in fixmes {
            let _ = writeln!(out, "- [ ] {f}");
        }
    }

    let _ = writeln!(
        out,
        "\nSee `audit-report.md` for full details and `report.html` for the interactive view."
    );
    out
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_snapshot;
    use super::*;

    #[test]
    fn readme_has_build_and_deploy() {
        let out = render(&sample_snapshot());
        assert!(out.contains("podman build -t my-host-image"));
        assert!(out.contains("bootc switch"));
        assert!(out.contains("1 packages added"));
    }
}
