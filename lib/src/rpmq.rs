//! The single adapter for package-database queries.
//!
//! All rpm queries against the host root funnel through this type, and
//! every bulk query runs at most once per process. Inspectors can never
//! contend on the database lock, and the performance contract is "one
//! bulk query plus set subtraction", never per-file lookups.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;

use crate::snapshot::{Package, VerifyEntry};
use crate::task::Task;

/// Memoized query facade over the host's package database.
#[derive(Debug, Default)]
pub(crate) struct RpmAdapter {
    root: Utf8PathBuf,
    packages: OnceCell<Vec<Package>>,
    verify: OnceCell<Vec<VerifyEntry>>,
    owned_paths: OnceCell<BTreeSet<Utf8PathBuf>>,
    history_removed: OnceCell<Vec<String>>,
}

impl RpmAdapter {
    pub(crate) fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Full installed inventory, sorted by name.
    pub(crate) fn packages(&self) -> Result<&[Package]> {
        self.packages
            .get_or_try_init(|| {
                let out = Task::new("Querying package inventory", "rpm")
                    .args(["--root", self.root.as_str(), "-qa", "--qf"])
                    .args([QUERYFORMAT])
                    .read()?;
                parse_inventory(&out).context("Parsing package inventory")
            })
            .map(|v| v.as_slice())
    }

    /// Verification entries for files failing the package manager's own
    /// verify pass.
    pub(crate) fn verify(&self) -> Result<&[VerifyEntry]> {
        self.verify
            .get_or_try_init(|| {
                // Verification exits nonzero whenever anything differs,
                // which is the expected case here.
                let out = Task::new("Verifying package files", "rpm")
                    .args(["--root", self.root.as_str(), "-Va", "--nomtime"])
                    .read_lenient()?;
                Ok(parse_verify(&out))
            })
            .map(|v| v.as_slice())
    }

    /// The complete set of package-owned paths, relative to the root.
    pub(crate) fn owned_paths(&self) -> Result<&BTreeSet<Utf8PathBuf>> {
        self.owned_paths.get_or_try_init(|| {
            let out = Task::new("Listing package-owned files", "rpm")
                .args(["--root", self.root.as_str(), "-qla"])
                .read()?;
            Ok(parse_owned_paths(&out))
        })
    }

    /// Package names that appear in the transaction history as installed
    /// and later removed.
    pub(crate) fn history_removed(&self) -> Result<&[String]> {
        self.history_removed
            .get_or_try_init(|| {
                let out = Task::new("Reading transaction history", "dnf")
                    .args(["-q", &format!("--installroot={}", self.root), "history", "list"])
                    .read_lenient()?;
                Ok(parse_history_removed(&out))
            })
            .map(|v| v.as_slice())
    }

    /// Best-effort retrieval of the package-shipped content of `path`
    /// from a locally cached package archive. Returns `None` when the
    /// archive is not in the cache.
    pub(crate) fn shipped_content(
        &self,
        pkg: &Package,
        path: &Utf8Path,
    ) -> Result<Option<String>> {
        let Some(rpm_path) = self.find_cached_rpm(pkg)? else {
            return Ok(None);
        };
        let out = Task::new_cmd("Extracting shipped file", {
            let mut c = std::process::Command::new("sh");
            c.args([
                "-c",
                &format!("rpm2cpio '{rpm_path}' | cpio -i --quiet --to-stdout './{path}'"),
            ]);
            c
        })
        .read()?;
        Ok(Some(out))
    }

    fn find_cached_rpm(&self, pkg: &Package) -> Result<Option<Utf8PathBuf>> {
        let cache = self.root.join("var/cache/dnf");
        if !cache.try_exists()? {
            return Ok(None);
        }
        let needle = format!("{}-{}-{}.{}.rpm", pkg.name, pkg.version, pkg.release, pkg.arch);
        for entry in walkdir::WalkDir::new(&cache).into_iter().flatten() {
            if entry.file_type().is_file() && entry.file_name().to_str() == Some(needle.as_str()) {
                let p = Utf8PathBuf::try_from(entry.into_path())
                    .context("Non-UTF8 path in package cache")?;
                return Ok(Some(p));
            }
        }
        Ok(None)
    }
}

const QUERYFORMAT: &str = "%{NAME}|%{EPOCHNUM}|%{VERSION}|%{RELEASE}|%{ARCH}\\n";

fn parse_inventory(out: &str) -> Result<Vec<Package>> {
    let mut ret = Vec::new();
    for line in out.lines().filter(|l| !l.is_empty()) {
        let mut parts = line.split('|');
        let (name, epoch, version, release, arch) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        );
        let (Some(name), Some(epoch), Some(version), Some(release), Some(arch)) =
            (name, epoch, version, release, arch)
        else {
            anyhow::bail!("Malformed inventory line: {line}");
        };
        let epoch: u64 = epoch.parse().with_context(|| format!("Parsing epoch in {line}"))?;
        ret.push(Package {
            name: name.to_string(),
            epoch: (epoch != 0).then_some(epoch),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        });
    }
    ret.sort();
    Ok(ret)
}

/// Parse `rpm -Va` output. Lines look like:
///
/// ```text
/// S.5....T.  c /etc/chrony.conf
/// missing   d /usr/share/doc/somepkg/README
/// .M.......    /usr/libexec/thing
/// ```
fn parse_verify(out: &str) -> Vec<VerifyEntry> {
    let mut ret = Vec::new();
    for line in out.lines() {
        let mut fields = line.split_whitespace();
        let Some(flags) = fields.next() else { continue };
        let flag_shaped = flags.len() == 9
            && flags
                .chars()
                .all(|c| matches!(c, 'S' | 'M' | '5' | 'D' | 'L' | 'U' | 'G' | 'T' | 'P' | '.' | '?'));
        if flags != "missing" && !flag_shaped {
            continue;
        }
        let rest: Vec<&str> = fields.collect();
        let (attr, path) = match rest.as_slice() {
            [path] if path.starts_with('/') => (None, *path),
            [attr, path] if path.starts_with('/') => (Some(*attr), *path),
            _ => continue,
        };
        ret.push(VerifyEntry {
            path: Utf8PathBuf::from(path.trim_start_matches('/')),
            flags: flags.to_string(),
            attr: attr.map(|a| a.to_string()),
        });
    }
    ret
}

fn parse_owned_paths(out: &str) -> BTreeSet<Utf8PathBuf> {
    out.lines()
        .filter(|l| l.starts_with('/'))
        .map(|l| Utf8PathBuf::from(l.trim_start_matches('/')))
        .collect()
}

/// Extract names of packages whose most recent history action removed
/// them after an earlier install.
fn parse_history_removed(out: &str) -> Vec<String> {
    let mut installed = BTreeSet::new();
    let mut removed = BTreeSet::new();
    // History listing is newest-first; walk oldest-first so later actions
    // win.
    for line in out.lines().rev() {
        let cols: Vec<&str> = line.split('|').map(|c| c.trim()).collect();
        if cols.len() < 4 {
            continue;
        }
        let command = cols[1];
        let action = cols[3];
        let Some(pkg) = command.split_whitespace().nth(1) else {
            continue;
        };
        if action.contains("Install") || command.starts_with("install") {
            installed.insert(pkg.to_string());
            removed.remove(pkg);
        }
        if action.contains("Removed") || command.starts_with("remove") {
            if installed.contains(pkg) {
                removed.insert(pkg.to_string());
            }
        }
    }
    removed.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn inventory() {
        let out = "zlib|0|1.2.11|40.el9|x86_64\nhttpd|1|2.4.57|8.el9|x86_64\n";
        let pkgs = parse_inventory(out).unwrap();
        assert_eq!(pkgs.len(), 2);
        // Sorted by name
        assert_eq!(pkgs[0].name, "httpd");
        assert_eq!(pkgs[0].epoch, Some(1));
        assert_eq!(pkgs[1].name, "zlib");
        assert_eq!(pkgs[1].epoch, None);
        assert_eq!(pkgs[1].release, "40.el9");
    }

    #[test]
    fn inventory_malformed() {
        assert!(parse_inventory("justonefield\n").is_err());
    }

    #[test]
    fn verify() {
        let out = indoc! { "
            S.5....T.  c /etc/chrony.conf
            missing   d /usr/share/doc/pkg/README
            .M.......    /usr/libexec/thing
            package foo is not installed
        " };
        let v = parse_verify(out);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0].path, "etc/chrony.conf");
        assert_eq!(v[0].flags, "S.5....T.");
        assert_eq!(v[0].attr.as_deref(), Some("c"));
        assert_eq!(v[1].flags, "missing");
        assert_eq!(v[2].attr, None);
    }

    #[test]
    fn owned() {
        let out = "/etc/httpd/conf/httpd.conf\n(contains no files)\n/usr/bin/ls\n";
        let set = parse_owned_paths(out);
        assert!(set.contains(Utf8Path::new("etc/httpd/conf/httpd.conf")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn history() {
        let out = indoc! { "
             5 | remove nginx       | 2024-03-01 10:00 | Removed        |    1
             4 | install nginx      | 2024-02-01 10:00 | Install        |    1
             3 | install httpd      | 2024-01-01 10:00 | Install        |    1
        " };
        let removed = parse_history_removed(out);
        assert_eq!(removed, vec!["nginx".to_string()]);
    }
}
