//! The markdown audit report.

use std::fmt::Write as _;

use crate::snapshot::{Severity, Snapshot, VarPlan};

use super::triage;

pub(crate) fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let t = triage(snapshot);

    let _ = writeln!(out, "# Audit report");
    if let Some(host) = snapshot.host.as_ref() {
        let _ = writeln!(
            out,
            "\nHost **{}**: {} {} ({}), inspected {}.",
            host.hostname, host.distro, host.version_id, host.arch, host.inspected_at.to_rfc3339()
        );
    }
    if let Some(target) = snapshot.target.as_ref() {
        let _ = writeln!(out, "Target base image: `{}`.", target.image);
        if target.cross_major {
            let _ = writeln!(out, "**Cross-major migration: review carefully.**");
        }
    }

    let _ = writeln!(out, "\n## Executive summary\n");
    let _ = writeln!(
        out,
        "| Triage | Count |\n|---|---|\n| Handled automatically | {} |\n| Handled with FIXME | {} |\n| Needs manual intervention | {} |",
        t.automatic, t.fixme, t.manual
    );
    if let Some(b) = snapshot.baseline.as_ref() {
        let _ = writeln!(
            out,
            "\nBaseline mode: `{}` ({} package(s) in the baseline).",
            serde_json::to_value(b.mode)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_default(),
            b.packages.len()
        );
    }

    if let Some(p) = snapshot.packages.as_ref() {
        let _ = writeln!(out, "\n## Packages\n");
        let _ = writeln!(
            out,
            "{} installed; {} added relative to the baseline, {} removed.",
            p.installed.len(),
            p.added.len(),
            p.removed.len()
        );
        if !p.added.is_empty() {
            let _ = writeln!(out, "\n| Added package |\n|---|");
            for name in &p.added {
                let _ = writeln!(out, "| {name} |");
            }
        }
        if !p.removed.is_empty() {
            let _ = writeln!(out, "\n| Removed package |\n|---|");
            for name in &p.removed {
                let _ = writeln!(out, "| {name} |");
            }
        }
        if !p.verify.is_empty() {
            let _ = writeln!(out, "\n{} file(s) fail package verification.", p.verify.len());
        }
    }

    if let Some(s) = snapshot.services.as_ref() {
        if !s.units.is_empty() {
            let _ = writeln!(out, "\n## Services\n");
            let _ = writeln!(out, "| Unit | State | Base default | Action |\n|---|---|---|---|");
            for u in &s.units {
                let _ = writeln!(
                    out,
                    "| {} | {:?} | {} | {:?} |",
                    u.name,
                    u.state,
                    u.preset.map(|p| format!("{p:?}")).unwrap_or_else(|| "absent".into()),
                    u.action
                );
            }
        }
    }

    if let Some(c) = snapshot.configs.as_ref() {
        let _ = writeln!(out, "\n## Configuration files\n");
        let _ = writeln!(
            out,
            "{} modified package-owned, {} unowned, {} orphaned.",
            c.modified.len(),
            c.unowned.len(),
            c.orphaned.len()
        );
        if !c.modified.is_empty() {
            let _ = writeln!(out, "\n| Modified file | Verify flags |\n|---|---|");
            for m in &c.modified {
                let _ = writeln!(out, "| /{} | `{}` |", m.file.path, m.flags);
            }
        }
        if !c.unowned.is_empty() {
            let _ = writeln!(out, "\n| Unowned file |\n|---|");
            for f in &c.unowned {
                let _ = writeln!(out, "| /{} |", f.path);
            }
        }
    }

    if let Some(n) = snapshot.network.as_ref() {
        let _ = writeln!(out, "\n## Network\n");
        for p in &n.profiles {
            let _ = writeln!(
                out,
                "- Profile `{}`: {}",
                p.name,
                match p.class {
                    crate::snapshot::ProfileClass::Static => "static; baked into the image",
                    crate::snapshot::ProfileClass::Dynamic => "dynamic; configure at deploy time",
                }
            );
        }
        for z in &n.firewall.zones {
            let _ = writeln!(
                out,
                "- Firewall zone `{}`: services [{}], ports [{}], {} rich rule(s)",
                z.name,
                z.services.join(", "),
                z.ports.join(", "),
                z.rich_rules.len()
            );
        }
        if let Some(dns) = n.dns {
            let _ = writeln!(out, "- Resolver configuration: {dns:?}");
        }
    }

    if let Some(s) = snapshot.storage.as_ref() {
        let _ = writeln!(out, "\n## Storage migration plan\n");
        if !s.mounts.is_empty() {
            let _ = writeln!(out, "| Mount | Type | Strategy |\n|---|---|---|");
            for m in &s.mounts {
                let _ = writeln!(out, "| {} | {} | {:?} |", m.target, m.fstype, m.strategy);
            }
        }
        let migrate: Vec<_> = s.var_usage.iter().filter(|u| u.plan == VarPlan::Migrate).collect();
        if !migrate.is_empty() {
            let _ = writeln!(
                out,
                "\nState under `/var` needing a migration strategy (seeded image content is \
                 written once at initial bootstrap and never updated afterwards):\n"
            );
            for u in migrate {
                let _ = writeln!(out, "- /{} (~{} KiB)", u.path, u.approx_bytes / 1024);
            }
        }
    }

    if let Some(s) = snapshot.scheduled.as_ref() {
        let _ = writeln!(out, "\n## Scheduled tasks\n");
        for c in &s.cron {
            let _ = writeln!(
                out,
                "- `{}` from /{} ({}): {}",
                c.schedule,
                c.source,
                c.user,
                c.on_calendar
                    .as_deref()
                    .map(|cal| format!("converted to `{cal}`"))
                    .unwrap_or_else(|| "**not convertible**".into())
            );
        }
        for t in &s.timers {
            let _ = writeln!(
                out,
                "- Timer `{}` ({:?}){}",
                t.name,
                t.scope,
                t.on_calendar
                    .as_deref()
                    .map(|c| format!(": `{c}`"))
                    .unwrap_or_default()
            );
        }
        for j in &s.at_jobs {
            let _ = writeln!(out, "- **At job** /{} needs manual handling", j.path);
        }
    }

    if let Some(c) = snapshot.containers.as_ref() {
        if !c.quadlets.is_empty() || !c.compose_files.is_empty() || !c.live.is_empty() {
            let _ = writeln!(out, "\n## Container workloads\n");
            for q in &c.quadlets {
                let _ = writeln!(
                    out,
                    "- Quadlet `{}` (image {})",
                    q.name,
                    q.image.as_deref().unwrap_or("unknown")
                );
            }
            for f in &c.compose_files {
                let _ = writeln!(out, "- Compose file /{} with {} service(s)", f.path, f.services.len());
            }
            for l in &c.live {
                let _ = writeln!(out, "- Live container `{}` running {} ({})", l.name, l.image, l.state);
            }
        }
    }

    if let Some(n) = snapshot.non_package.as_ref() {
        if !n.items.is_empty() {
            let _ = writeln!(out, "\n## Non-package software\n");
            let _ = writeln!(out, "| Path | Provenance | Confidence | Detail |\n|---|---|---|---|");
            for i in &n.items {
                let _ = writeln!(
                    out,
                    "| /{} | {:?} | {:?} | {} |",
                    i.path,
                    i.provenance,
                    i.confidence,
                    i.detail.as_deref().unwrap_or("-")
                );
            }
        }
    }

    if let Some(k) = snapshot.kernel.as_ref() {
        if !k.sysctl.is_empty() || !k.modules.is_empty() {
            let _ = writeln!(out, "\n## Kernel and boot\n");
            for s in &k.sysctl {
                let _ = writeln!(
                    out,
                    "- `{}` = `{}` (from /{}, default {})",
                    s.key,
                    s.value,
                    s.source,
                    s.default.as_deref().unwrap_or("unset")
                );
            }
            if !k.modules.is_empty() {
                let _ = writeln!(out, "- Non-default modules: {}", k.modules.join(", "));
            }
        }
    }

    if let Some(s) = snapshot.security.as_ref() {
        let _ = writeln!(out, "\n## SELinux\n");
        let _ = writeln!(
            out,
            "Mode {}, policy {}.",
            s.mode.as_deref().unwrap_or("unknown"),
            s.policy_type.as_deref().unwrap_or("unknown")
        );
        for m in &s.custom_modules {
            let _ = writeln!(out, "- Custom module `{m}` (rebuild required)");
        }
        for b in &s.booleans {
            let _ = writeln!(out, "- Boolean `{}` = {}", b.name, b.value);
        }
    }

    if let Some(u) = snapshot.users.as_ref() {
        if !u.passwd.is_empty() {
            let _ = writeln!(out, "\n## Users and groups\n");
            let _ = writeln!(
                out,
                "{} non-system user(s), {} group(s); credentials are not carried (locked \
                 placeholders in the provisioning fragments).",
                u.passwd.len(),
                u.group.len()
            );
        }
    }

    let manual: Vec<_> = snapshot
        .warnings
        .iter()
        .filter(|w| w.severity == Severity::Error)
        .collect();
    if !manual.is_empty() {
        let _ = writeln!(out, "\n## Items requiring manual intervention\n");
        for w in manual {
            let _ = writeln!(
                out,
                "- [{}] {}{}",
                w.source,
                w.message,
                w.suggestion
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default()
            );
        }
    }

    if !snapshot.warnings.is_empty() {
        let _ = writeln!(out, "\n## All warnings\n");
        let _ = writeln!(out, "| Severity | Source | Message |\n|---|---|---|");
        for w in &snapshot.warnings {
            let _ = writeln!(out, "| {:?} | {} | {} |", w.severity, w.source, w.message);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_snapshot;
    use super::*;

    #[test]
    fn report_covers_sections() {
        let out = render(&sample_snapshot());
        assert!(out.contains("# Audit report"));
        assert!(out.contains("## Executive summary"));
        assert!(out.contains("| httpd |"));
        assert!(out.contains("httpd.service"));
        assert!(out.contains("eth0-static"));
        assert!(out.contains("converted to `*-*-* 03:00:00`"));
        assert!(out.contains("collector.container"));
    }

    #[test]
    fn warnings_table_preserves_order() {
        let out = render(&sample_snapshot());
        assert!(out.contains("| Warn | network | resolv.conf is hand-edited |"));
    }
}
