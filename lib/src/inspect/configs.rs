//! Configuration capture: modified owned files, unowned files under the
//! system configuration directory, and orphans from removed packages.

use std::collections::BTreeSet;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::dirext::CapStdExtDirExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;

use super::{InspectContext, Inspector};
use crate::snapshot::{
    CapturedFile, ConfigsSection, ModifiedConfig, OrphanedConfig, Package, Snapshot,
};
use crate::task::Task;

const NAME: &str = "configs";

/// Files above this size are referenced but not captured.
const MAX_CAPTURE: u64 = 262_144;

/// System-generated artifacts that are never interesting to carry into an
/// image. Maintained as a flat list at the top of the file so additions
/// stay reviewable.
const LITERAL_EXCLUDES: &[&str] = &[
    "etc/machine-id",
    "etc/hostname",
    "etc/fstab",
    "etc/crypttab",
    "etc/shadow",
    "etc/shadow-",
    "etc/gshadow",
    "etc/gshadow-",
    "etc/passwd",
    "etc/passwd-",
    "etc/group",
    "etc/group-",
    "etc/subuid",
    "etc/subgid",
    "etc/resolv.conf",
    "etc/mtab",
    "etc/adjtime",
    "etc/ld.so.cache",
    "etc/aliases.db",
];

/// Pattern-shaped exclusions, including trees that other inspectors
/// capture in structured form.
const GLOB_EXCLUDES: &[&str] = &[
    "etc/ssh/ssh_host_*",
    "etc/pki/**",
    "etc/ssl/**",
    "etc/selinux/**",
    "etc/udev/hwdb.bin",
    "**/*.cache",
    "**/.updated",
    "etc/NetworkManager/system-connections/*",
    "etc/yum.repos.d/*",
    "etc/systemd/system/**",
];

static EXCLUDES: Lazy<GlobSet> = Lazy::new(|| {
    let mut b = GlobSetBuilder::new();
    for lit in LITERAL_EXCLUDES {
        b.add(Glob::new(lit).expect("static literal"));
    }
    for g in GLOB_EXCLUDES {
        b.add(Glob::new(g).expect("static glob"));
    }
    b.build().expect("static globset")
});

/// Exclusion is monotone: once any rule matches, the file is excluded.
pub(crate) fn is_excluded(path: &Utf8Path) -> bool {
    EXCLUDES.is_match(path.as_str())
}

/// Collects the three config classes.
#[derive(Debug)]
pub(crate) struct ConfigInspector;

/// Walk `etc` under the host root and return every file not owned by a
/// package and not excluded, sorted. One filesystem walk against one
/// prebuilt owned-path set; no per-file queries.
fn unowned_files(
    root_path: &Utf8Path,
    owned: &BTreeSet<Utf8PathBuf>,
) -> Result<Vec<Utf8PathBuf>> {
    let etc = root_path.join("etc");
    let mut ret = Vec::new();
    for entry in walkdir::WalkDir::new(&etc).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            continue;
        };
        let Ok(rel) = path.strip_prefix(root_path) else {
            continue;
        };
        if owned.contains(rel) || is_excluded(rel) {
            continue;
        }
        ret.push(rel.to_owned());
    }
    ret.sort();
    Ok(ret)
}

fn capture_limited(ctx: &InspectContext, rel: &Utf8Path) -> Option<CapturedFile> {
    let meta = ctx.root.metadata(rel).ok()?;
    if meta.len() > MAX_CAPTURE {
        ctx.warnings.info(
            NAME,
            format!("{rel} is {} bytes; referenced but not captured", meta.len()),
        );
        let mut f = CapturedFile::new(rel, String::new());
        f.content = None;
        return Some(f.with_note("too large to capture"));
    }
    ctx.capture(NAME, rel)
}

/// Generate a unified diff between the package-shipped body and the
/// on-host body.
pub(crate) fn unified_diff(path: &Utf8Path, original: &str, current: &str) -> String {
    similar::TextDiff::from_lines(original, current)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Resolve owning packages for a set of paths in a single bulk query.
fn owners_of(ctx: &InspectContext, paths: &[&Utf8Path]) -> Result<Vec<Option<Package>>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let mut task = Task::new("Resolving file owners", "rpm").args([
        "--root",
        ctx.root_path.as_str(),
        "-qf",
        "--qf",
        "%{NAME}|%{EPOCHNUM}|%{VERSION}|%{RELEASE}|%{ARCH}\\n",
    ]);
    for p in paths {
        task = task.args([format!("/{p}")]);
    }
    let out = task.read_lenient()?;
    let mut ret = Vec::new();
    for line in out.lines() {
        let mut parts = line.split('|');
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(epoch), Some(version), Some(release), Some(arch)) => {
                let epoch: u64 = epoch.parse().unwrap_or(0);
                ret.push(Some(Package {
                    name: name.to_string(),
                    epoch: (epoch != 0).then_some(epoch),
                    version: version.to_string(),
                    release: release.to_string(),
                    arch: arch.to_string(),
                }));
            }
            _ => ret.push(None),
        }
    }
    ret.resize(paths.len(), None);
    Ok(ret)
}

impl Inspector for ConfigInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = ConfigsSection::default();

        // Pass 1: owned-and-modified, from the shared verify results.
        let verify = match ctx.rpm.verify() {
            Ok(v) => v.to_vec(),
            Err(e) => {
                ctx.warnings
                    .info(NAME, format!("Package verification unavailable: {e:#}"));
                section.partial = true;
                Vec::new()
            }
        };
        let modified: Vec<_> = verify
            .iter()
            .filter(|v| v.attr.as_deref() == Some("c") && v.flags != "missing")
            .filter(|v| v.path.starts_with("etc"))
            .collect();
        let owners = if ctx.opts.config_diffs {
            let paths: Vec<&Utf8Path> = modified.iter().map(|v| v.path.as_path()).collect();
            match owners_of(ctx, &paths) {
                Ok(o) => o,
                Err(e) => {
                    ctx.warnings
                        .info(NAME, format!("Owner resolution failed: {e:#}"));
                    vec![None; modified.len()]
                }
            }
        } else {
            vec![None; modified.len()]
        };
        for (entry, owner) in modified.iter().zip(owners) {
            let Some(mut file) = capture_limited(ctx, &entry.path) else {
                continue;
            };
            let mut diff = None;
            if ctx.opts.config_diffs {
                let shipped = owner
                    .as_ref()
                    .and_then(|pkg| ctx.rpm.shipped_content(pkg, &entry.path).ok().flatten());
                match (shipped, file.content.as_ref()) {
                    (Some(original), Some(current)) => {
                        diff = Some(unified_diff(&entry.path, &original, current));
                    }
                    _ => {
                        file = file.with_note("shipped original unavailable; full file captured");
                    }
                }
            }
            section.modified.push(ModifiedConfig {
                flags: entry.flags.clone(),
                file,
                diff,
            });
        }

        // Pass 2: unowned files under etc, one walk minus the owned set.
        match ctx.rpm.owned_paths() {
            Ok(owned) => {
                for rel in unowned_files(&ctx.root_path, owned)? {
                    if let Some(f) = capture_limited(ctx, &rel) {
                        section.unowned.push(f);
                    }
                }
            }
            Err(e) => {
                ctx.warnings
                    .info(NAME, format!("Owned-path listing unavailable: {e:#}"));
                section.partial = true;
            }
        }

        // Pass 3: orphaned config footprints of install-then-removed
        // packages.
        if let Ok(removed) = ctx.rpm.history_removed() {
            for pkg in removed {
                let footprint = format!("etc/{pkg}");
                let Ok(Some(dir)) = ctx.root.open_dir_optional(&footprint) else {
                    continue;
                };
                for entry in dir.entries().into_iter().flatten().flatten() {
                    let Some(fname) = entry.file_name().to_str().map(|s| s.to_string()) else {
                        continue;
                    };
                    let rel = Utf8PathBuf::from(&footprint).join(&fname);
                    if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        if let Some(file) = capture_limited(ctx, &rel) {
                            section.orphaned.push(OrphanedConfig {
                                package: pkg.clone(),
                                file,
                            });
                        }
                    }
                }
            }
        }

        snapshot.configs = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_is_monotone() {
        assert!(is_excluded(Utf8Path::new("etc/machine-id")));
        assert!(is_excluded(Utf8Path::new("etc/pki/ca-trust/extracted/pem/x.pem")));
        assert!(is_excluded(Utf8Path::new("etc/NetworkManager/system-connections/eth0.nmconnection")));
        assert!(is_excluded(Utf8Path::new("etc/systemd/system/foo.service.d/override.conf")));
        assert!(!is_excluded(Utf8Path::new("etc/chrony.conf")));
        assert!(!is_excluded(Utf8Path::new("etc/app/settings.ini")));
    }

    #[test]
    fn unowned_walk_subtracts_owned_and_excluded() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(td.path()).unwrap();
        std::fs::create_dir_all(root.join("etc/app"))?;
        std::fs::write(root.join("etc/app/local.conf"), "x=1\n")?;
        std::fs::write(root.join("etc/chrony.conf"), "pool example\n")?;
        std::fs::write(root.join("etc/machine-id"), "abc\n")?;
        let owned: BTreeSet<Utf8PathBuf> = [Utf8PathBuf::from("etc/chrony.conf")].into();
        let unowned = unowned_files(root, &owned)?;
        assert_eq!(unowned, vec![Utf8PathBuf::from("etc/app/local.conf")]);
        Ok(())
    }

    #[test]
    fn diff_shape() {
        let d = unified_diff(
            Utf8Path::new("etc/chrony.conf"),
            "pool a\nkeyfile x\n",
            "pool b\nkeyfile x\n",
        );
        assert!(d.starts_with("--- a/etc/chrony.conf"));
        assert!(d.contains("-pool a"));
        assert!(d.contains("+pool b"));
    }
}
