//! Renderers: pure functions from a sealed snapshot to output artifacts.
//!
//! Rendering happens entirely in memory first (which makes byte-for-byte
//! idempotence testable), then a single writer pass materializes the
//! artifact tree.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;

use crate::snapshot::{ProfileClass, Provenance, Severity, Snapshot, SNAPSHOT_FILENAME};

pub(crate) mod containerfile;
mod html;
mod kickstart;
mod readme;
mod report;
mod secrets;
pub(crate) mod units;

/// Triage of everything the inspectors found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Triage {
    /// Handled fully by the generated recipe.
    pub(crate) automatic: usize,
    /// Handled, but marked FIXME for review.
    pub(crate) fixme: usize,
    /// Needs manual intervention.
    pub(crate) manual: usize,
}

/// Derive the triage counts shown in the report headers.
pub(crate) fn triage(snapshot: &Snapshot) -> Triage {
    let mut t = Triage::default();
    for w in &snapshot.warnings {
        match w.severity {
            Severity::Error => t.manual += 1,
            Severity::Warn => t.fixme += 1,
            Severity::Info => {}
        }
    }
    if let Some(p) = snapshot.packages.as_ref() {
        t.automatic += p.added.len() + p.removed.len();
    }
    if let Some(s) = snapshot.services.as_ref() {
        t.automatic += s.units.len();
    }
    if let Some(c) = snapshot.configs.as_ref() {
        t.automatic += c.modified.len() + c.unowned.len();
        t.fixme += c.orphaned.len();
    }
    if let Some(s) = snapshot.scheduled.as_ref() {
        t.automatic += s.cron.iter().filter(|c| c.on_calendar.is_some()).count();
        t.fixme += s.cron.iter().filter(|c| c.on_calendar.is_none()).count();
        t.manual += s.at_jobs.len();
    }
    if let Some(n) = snapshot.non_package.as_ref() {
        for item in &n.items {
            match item.provenance {
                Provenance::Pip | Provenance::Npm | Provenance::Gem => t.automatic += 1,
                Provenance::Unknown => t.manual += 1,
                _ => t.fixme += 1,
            }
        }
    }
    if let Some(c) = snapshot.containers.as_ref() {
        t.automatic += c.quadlets.len();
        t.fixme += c.compose_files.len();
    }
    if let Some(s) = snapshot.security.as_ref() {
        t.manual += s.custom_modules.len();
        t.automatic += s.booleans.len();
    }
    t
}

/// The complete artifact set, keyed by output-relative path.
#[derive(Debug, Default)]
pub(crate) struct RenderedOutput {
    pub(crate) files: BTreeMap<Utf8PathBuf, String>,
}

impl RenderedOutput {
    fn insert(&mut self, path: impl Into<Utf8PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

/// Render every artifact from a sealed snapshot.
pub(crate) fn render(snapshot: &Snapshot) -> Result<RenderedOutput> {
    if !snapshot.sealed {
        anyhow::bail!("Refusing to render an unsealed snapshot");
    }
    let mut out = RenderedOutput::default();

    out.insert("Containerfile", containerfile::render(snapshot));
    out.insert("audit-report.md", report::render(snapshot));
    out.insert("report.html", html::render(snapshot));
    out.insert("README.md", readme::render(snapshot));
    out.insert("kickstart-suggestion.ks", kickstart::render(snapshot));
    out.insert("secrets-review.md", secrets::render(snapshot));
    out.insert(SNAPSHOT_FILENAME, snapshot.to_json()?);

    // Paths routed somewhere other than the generic config mirror.
    let mut special: BTreeSet<Utf8PathBuf> = BTreeSet::new();
    if let Some(containers) = snapshot.containers.as_ref() {
        for q in &containers.quadlets {
            special.insert(q.file.path.clone());
            if let Some(body) = q.file.content.as_deref() {
                out.insert(Utf8PathBuf::from("quadlet").join(&q.name), body);
            }
        }
    }
    if let Some(network) = snapshot.network.as_ref() {
        // Dynamic profiles are deploy-time configuration; they must not
        // land in the image's config tree.
        for p in network
            .profiles
            .iter()
            .filter(|p| p.class == ProfileClass::Dynamic)
        {
            special.insert(p.file.path.clone());
        }
    }

    let mut mirror: Vec<(Utf8PathBuf, String)> = Vec::new();
    snapshot.visit_files(|f| {
        if f.excluded || special.contains(&f.path) {
            return;
        }
        if let Some(body) = f.content.as_deref() {
            mirror.push((Utf8PathBuf::from("config").join(&f.path), body.to_string()));
        }
    });
    for (path, body) in mirror {
        out.insert(path, body);
    }

    if let Some(sched) = snapshot.scheduled.as_ref() {
        for unit in units::plan_timer_units(&sched.cron) {
            let dir = Utf8Path::new("config/etc/systemd/system");
            out.insert(dir.join(format!("{}.timer", unit.base)), unit.timer_body);
            out.insert(dir.join(format!("{}.service", unit.base)), unit.service_body);
        }
    }
    if let Some(storage) = snapshot.storage.as_ref() {
        if let Some(snippet) = units::tmpfiles_snippet(&storage.var_usage) {
            out.insert("config/etc/tmpfiles.d/var-structure.conf", snippet);
        }
    }
    if let Some(users) = snapshot.users.as_ref() {
        for (name, body) in units::account_fragments(users) {
            out.insert(Utf8PathBuf::from("config/tmp").join(name), body);
        }
    }

    Ok(out)
}

/// Write the artifact tree under `output_dir`, creating it if missing.
pub(crate) fn write_to(rendered: &RenderedOutput, output_dir: &Utf8Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Creating output directory {output_dir}"))?;
    let dir = Dir::open_ambient_dir(output_dir, cap_std::ambient_authority())
        .with_context(|| format!("Opening output directory {output_dir}"))?;
    for (path, content) in &rendered.files {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            dir.create_dir_all(parent)
                .with_context(|| format!("Creating {parent}"))?;
        }
        dir.atomic_write(path, content.as_bytes())
            .with_context(|| format!("Writing {path}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::*;

    pub(crate) fn sample_snapshot() -> Snapshot {
        let mut s = Snapshot::new();
        s.host = Some(HostInfo {
            hostname: "web01".into(),
            distro: "CentOS Stream".into(),
            distro_id: "centos".into(),
            version_id: "9".into(),
            major: 9,
            arch: "x86_64".into(),
            inspected_at: chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        });
        s.target = Some(TargetImage {
            image: "quay.io/centos-bootc/centos-bootc:stream9".into(),
            source: TargetSource::Auto,
            cross_major: false,
        });
        s.baseline = Some(Baseline {
            packages: ["bash".to_string()].into(),
            preset_enabled: Default::default(),
            preset_disabled: Default::default(),
            mode: BaselineMode::Queried,
        });
        s.packages = Some(PackagesSection {
            added: vec!["httpd".into()],
            repo_files: vec![CapturedFile::new("etc/yum.repos.d/internal.repo", "[internal]\n")],
            ..Default::default()
        });
        s.services = Some(ServicesSection {
            units: vec![ServiceUnit {
                name: "httpd.service".into(),
                state: ServiceState::Enabled,
                preset: None,
                action: ServiceAction::Enable,
            }],
            ..Default::default()
        });
        s.configs = Some(ConfigsSection {
            unowned: vec![CapturedFile::new("etc/app/local.conf", "x=1\n")],
            ..Default::default()
        });
        s.network = Some(NetworkSection {
            profiles: vec![
                NmProfile {
                    name: "eth0-static".into(),
                    class: ProfileClass::Static,
                    file: CapturedFile::new(
                        "etc/NetworkManager/system-connections/eth0.nmconnection",
                        "[ipv4]\nmethod=manual\n",
                    ),
                },
                NmProfile {
                    name: "eth1".into(),
                    class: ProfileClass::Dynamic,
                    file: CapturedFile::new(
                        "etc/NetworkManager/system-connections/eth1.nmconnection",
                        "[ipv4]\nmethod=auto\n",
                    ),
                },
            ],
            dns: Some(DnsProvenance::HandEdited),
            nameservers: vec!["192.0.2.53".into()],
            ..Default::default()
        });
        s.scheduled = Some(ScheduledSection {
            cron: vec![CronEntry {
                source: "etc/crontab".into(),
                schedule: "0 3 * * *".into(),
                user: "root".into(),
                command: "/usr/local/bin/backup.sh".into(),
                on_calendar: Some("*-*-* 03:00:00".into()),
                unit_name: Some("cron-backup".into()),
            }],
            ..Default::default()
        });
        s.containers = Some(ContainersSection {
            quadlets: vec![QuadletUnit {
                name: "collector.container".into(),
                image: Some("quay.io/example/collector:1.4".into()),
                file: CapturedFile::new(
                    "etc/containers/systemd/collector.container",
                    "[Container]\nImage=quay.io/example/collector:1.4\n",
                ),
            }],
            ..Default::default()
        });
        s.users = Some(UsersSection {
            passwd: vec!["alice:x:1000:1000::/home/alice:/bin/bash".into()],
            group: vec!["alice:x:1000:".into()],
            ..Default::default()
        });
        s.warnings = vec![Warning {
            severity: Severity::Warn,
            source: "network".into(),
            resource: None,
            message: "resolv.conf is hand-edited".into(),
            suggestion: None,
            dismissible: true,
        }];
        s.sealed = true;
        s
    }

    #[test]
    fn refuses_unsealed() {
        let mut s = sample_snapshot();
        s.sealed = false;
        assert!(render(&s).is_err());
    }

    #[test]
    fn artifact_layout() {
        let out = render(&sample_snapshot()).unwrap();
        for expected in [
            "Containerfile",
            "README.md",
            "audit-report.md",
            "report.html",
            "kickstart-suggestion.ks",
            "secrets-review.md",
            "inspection-snapshot.json",
            "config/etc/app/local.conf",
            "config/etc/yum.repos.d/internal.repo",
            "quadlet/collector.container",
            "config/etc/systemd/system/cron-backup.timer",
            "config/etc/systemd/system/cron-backup.service",
            "config/tmp/passwd.append",
            "config/tmp/shadow.append",
        ] {
            assert!(
                out.files.contains_key(Utf8Path::new(expected)),
                "missing {expected}; have {:?}",
                out.files.keys().collect::<Vec<_>>()
            );
        }
        // Static profile mirrors into the config tree; dynamic does not
        assert!(out
            .files
            .contains_key(Utf8Path::new("config/etc/NetworkManager/system-connections/eth0.nmconnection")));
        assert!(!out
            .files
            .contains_key(Utf8Path::new("config/etc/NetworkManager/system-connections/eth1.nmconnection")));
        // Quadlet content is routed to quadlet/, not the config mirror
        assert!(!out
            .files
            .contains_key(Utf8Path::new("config/etc/containers/systemd/collector.container")));
    }

    #[test]
    fn idempotent_re_render() {
        let s = sample_snapshot();
        let a = render(&s).unwrap();
        let b = render(&s).unwrap();
        assert_eq!(a.files, b.files);
    }

    #[test]
    fn snapshot_roundtrip_renders_identically() {
        let s = sample_snapshot();
        let first = render(&s).unwrap();
        let json = &first.files[Utf8Path::new("inspection-snapshot.json")];
        let reloaded: Snapshot = serde_json::from_str(json).unwrap();
        let second = render(&reloaded).unwrap();
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn write_creates_tree() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let out = render(&sample_snapshot())?;
        let dir = Utf8PathBuf::try_from(td.path().join("output")).unwrap();
        write_to(&out, &dir)?;
        assert!(dir.join("Containerfile").is_file());
        assert!(dir.join("config/etc/app/local.conf").is_file());
        assert!(dir.join("quadlet/collector.container").is_file());
        Ok(())
    }

    #[test]
    fn triage_counts() {
        let t = triage(&sample_snapshot());
        assert_eq!(t.manual, 0);
        assert!(t.fixme >= 1);
        assert!(t.automatic >= 3);
    }
}
