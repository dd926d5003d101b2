//! Discovery of software installed outside the package manager.
//!
//! Scans a whitelist of path roots for ecosystem metadata, then runs a
//! fast object-file classification pass over bare binaries. Items that
//! resist classification are carried with unknown provenance; the recipe
//! marks them for manual review rather than guessing.

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{InspectContext, Inspector};
use crate::snapshot::{Confidence, NonPackageItem, NonPackageSection, Provenance, Snapshot};
use crate::task::Task;

const NAME: &str = "non_package";

/// How much of a binary the fast pass reads for version strings.
const PREFIX_SCAN: usize = 65_536;

/// Collects the non-package section. Home directories are deliberately
/// never scanned.
#[derive(Debug)]
pub(crate) struct NonPackageInspector;

/// FHS subdirectories under /usr/local, enumerated individually.
const USR_LOCAL_DIRS: &[&str] = &[
    "usr/local/bin",
    "usr/local/sbin",
    "usr/local/lib",
    "usr/local/lib64",
    "usr/local/libexec",
    "usr/local/share",
    "usr/local/etc",
    "usr/local/games",
];

/// Conservative allowlist of version-string shapes: `name x.y.z`,
/// `name/x.y.z`, `name-x.y.z`. Anything looser produces too much noise
/// from embedded data.
static VERSION_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9_+]{2,24})[ /-]v?(\d+\.\d+(?:\.\d+){0,2})\b")
        .expect("static regex")
});

/// Classify a directory by its ecosystem metadata, when any is present.
pub(crate) fn classify_dir_metadata(dir: &Utf8Path) -> Option<(Provenance, Confidence, String)> {
    if dir.join(".git").is_dir() {
        let detail = git_remote(dir).unwrap_or_else(|| "no remote configured".into());
        return Some((Provenance::Git, Confidence::High, detail));
    }
    if dir.join("pyvenv.cfg").is_file() {
        return Some((Provenance::Pip, Confidence::High, "python virtualenv".into()));
    }
    for lock in ["package-lock.json", "yarn.lock"] {
        if dir.join(lock).is_file() {
            return Some((Provenance::Npm, Confidence::High, format!("lockfile {lock}")));
        }
    }
    if dir.join("Gemfile.lock").is_file() {
        return Some((Provenance::Gem, Confidence::High, "lockfile Gemfile.lock".into()));
    }
    if let Some(count) = dist_info_count(dir) {
        return Some((
            Provenance::Pip,
            Confidence::High,
            format!("{count} pip distribution(s)"),
        ));
    }
    None
}

fn git_remote(dir: &Utf8Path) -> Option<String> {
    let config = std::fs::read_to_string(dir.join(".git/config")).ok()?;
    let mut in_remote = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_remote = line.starts_with("[remote");
            continue;
        }
        if in_remote {
            if let Some(url) = line.strip_prefix("url") {
                return Some(format!("remote {}", url.trim_start_matches(['=', ' ']).trim()));
            }
        }
    }
    None
}

fn dist_info_count(dir: &Utf8Path) -> Option<usize> {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(dir)
        .max_depth(4)
        .into_iter()
        .flatten()
    {
        if entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(".dist-info"))
        {
            count += 1;
        }
    }
    (count > 0).then_some(count)
}

/// Classify an object file from its section table.
pub(crate) fn classify_sections(readelf_sections: &str) -> (Provenance, Confidence) {
    if readelf_sections.contains(".note.go.buildid") || readelf_sections.contains(".gopclntab") {
        (Provenance::GoBinary, Confidence::High)
    } else if readelf_sections.contains(".rustc")
        || readelf_sections.contains("rust_eh_personality")
    {
        (Provenance::RustBinary, Confidence::Medium)
    } else {
        (Provenance::CBinary, Confidence::Medium)
    }
}

/// Dynamic dependencies listed in the file header; never resolved.
pub(crate) fn parse_needed(readelf_dynamic: &str) -> Vec<String> {
    let mut ret = Vec::new();
    for line in readelf_dynamic.lines() {
        if !line.contains("(NEEDED)") {
            continue;
        }
        if let Some(lib) = line.rsplit('[').next().and_then(|s| s.split(']').next()) {
            ret.push(lib.to_string());
        }
    }
    ret
}

/// Pull the first allowlisted version string out of raw bytes.
pub(crate) fn version_from_bytes(buf: &[u8]) -> Option<String> {
    let mut run = String::new();
    for &b in buf {
        if (0x20..0x7f).contains(&b) {
            run.push(b as char);
            continue;
        }
        if run.len() >= 8 {
            if let Some(c) = VERSION_STRING.captures(&run) {
                return Some(format!("{} {}", &c[1], &c[2]));
            }
        }
        run.clear();
    }
    if run.len() >= 8 {
        if let Some(c) = VERSION_STRING.captures(&run) {
            return Some(format!("{} {}", &c[1], &c[2]));
        }
    }
    None
}

fn is_elf(buf: &[u8]) -> bool {
    buf.len() >= 4 && &buf[..4] == b"\x7fELF"
}

fn shebang(buf: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(buf.get(..buf.len().min(120))?).ok()?;
    let first = text.lines().next()?;
    first
        .strip_prefix("#!")
        .map(|i| i.trim().split_whitespace().collect::<Vec<_>>().join(" "))
}

fn classify_binary(ctx: &InspectContext, rel: &Utf8Path, abs: &Utf8Path) -> Result<NonPackageItem> {
    let scan_len = if ctx.opts.deep_binary_scan {
        usize::MAX
    } else {
        PREFIX_SCAN
    };
    let buf = read_prefix(abs, scan_len)?;
    if !is_elf(&buf) {
        if let Some(interp) = shebang(&buf) {
            return Ok(NonPackageItem {
                path: rel.to_owned(),
                provenance: Provenance::Unknown,
                confidence: Confidence::Low,
                version: None,
                detail: Some(format!("script ({interp})")),
                needed_libs: Vec::new(),
            });
        }
        return Ok(NonPackageItem {
            path: rel.to_owned(),
            provenance: Provenance::Unknown,
            confidence: Confidence::Unknown,
            version: None,
            detail: None,
            needed_libs: Vec::new(),
        });
    }
    let sections = Task::new("Reading section table", "readelf")
        .args(["-S", "-n", abs.as_str()])
        .read_lenient();
    let (provenance, confidence) = match sections {
        Ok(out) => classify_sections(&out),
        Err(e) => {
            ctx.warnings
                .info(NAME, format!("readelf unavailable: {e:#}"));
            (Provenance::Unknown, Confidence::Unknown)
        }
    };
    let needed_libs = Task::new("Reading dynamic section", "readelf")
        .args(["-d", abs.as_str()])
        .read_lenient()
        .map(|out| parse_needed(&out))
        .unwrap_or_default();
    Ok(NonPackageItem {
        path: rel.to_owned(),
        provenance,
        confidence,
        version: version_from_bytes(&buf),
        detail: (!needed_libs.is_empty()).then(|| "dynamically linked".to_string()),
        needed_libs,
    })
}

fn read_prefix(path: &Utf8Path, limit: usize) -> Result<Vec<u8>> {
    use std::io::Read;
    let f = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    f.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

impl Inspector for NonPackageInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = NonPackageSection {
            deep_scan: ctx.opts.deep_binary_scan,
            ..Default::default()
        };
        let owned = ctx.rpm.owned_paths().ok();

        // Directory roots: one level under /opt and /srv.
        for root in ["opt", "srv"] {
            for name in ctx.list_dir(root)? {
                let rel = Utf8PathBuf::from(root).join(&name);
                let abs = ctx.root_path.join(&rel);
                if !abs.is_dir() {
                    continue;
                }
                if owned.is_some_and(|o| o.contains(&rel)) {
                    continue;
                }
                if let Some((provenance, confidence, detail)) = classify_dir_metadata(&abs) {
                    section.items.push(NonPackageItem {
                        path: rel,
                        provenance,
                        confidence,
                        version: None,
                        detail: Some(detail),
                        needed_libs: Vec::new(),
                    });
                } else {
                    section.items.push(NonPackageItem {
                        path: rel,
                        provenance: Provenance::Unknown,
                        confidence: Confidence::Unknown,
                        version: None,
                        detail: None,
                        needed_libs: Vec::new(),
                    });
                }
            }
        }

        // Loose files under the /usr/local FHS directories.
        for dir in USR_LOCAL_DIRS {
            for name in ctx.list_dir(dir)? {
                let rel = Utf8PathBuf::from(*dir).join(&name);
                let abs = ctx.root_path.join(&rel);
                if !abs.is_file() {
                    continue;
                }
                if owned.is_some_and(|o| o.contains(&rel)) {
                    continue;
                }
                match classify_binary(ctx, &rel, &abs) {
                    Ok(item) => section.items.push(item),
                    Err(e) => {
                        ctx.warnings
                            .info(NAME, format!("Could not classify {rel}: {e:#}"));
                        section.partial = true;
                    }
                }
            }
        }

        section.items.sort_by(|a, b| a.path.cmp(&b.path));
        let unknown = section
            .items
            .iter()
            .filter(|i| i.provenance == Provenance::Unknown)
            .count();
        if unknown > 0 {
            ctx.warnings.warn(
                NAME,
                format!("{unknown} item(s) have unknown provenance and need manual review"),
            );
        }

        snapshot.non_package = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_and_rust_sections() {
        let go = "  [12] .note.go.buildid NOTE 0000000000400f9c\n";
        assert_eq!(classify_sections(go), (Provenance::GoBinary, Confidence::High));
        let rust = "  [20] .rustc PROGBITS 0000000000000000\n";
        assert_eq!(classify_sections(rust), (Provenance::RustBinary, Confidence::Medium));
        let c = "  [13] .text PROGBITS 0000000000401000\n";
        assert_eq!(classify_sections(c), (Provenance::CBinary, Confidence::Medium));
    }

    #[test]
    fn needed_libraries() {
        let out = " 0x0000000000000001 (NEEDED)             Shared library: [libc.so.6]\n \
                   0x0000000000000001 (NEEDED)             Shared library: [libssl.so.3]\n \
                   0x000000000000000e (SONAME)             Library soname: [libfoo.so]\n";
        assert_eq!(parse_needed(out), vec!["libc.so.6", "libssl.so.3"]);
    }

    #[test]
    fn version_strings() {
        let buf = b"\x00\x01junk\x00openssl 3.0.7 some text\x00more\x00";
        assert_eq!(version_from_bytes(buf).as_deref(), Some("openssl 3.0.7"));
        assert_eq!(version_from_bytes(b"\x00\x01\x02nothing here\x00"), None);
    }

    #[test]
    fn dir_metadata_classification() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(td.path()).unwrap();
        let venv = root.join("opt/app-venv");
        std::fs::create_dir_all(&venv)?;
        std::fs::write(venv.join("pyvenv.cfg"), "home = /usr/bin\nversion = 3.11.5\n")?;
        let repo = root.join("opt/tool");
        std::fs::create_dir_all(repo.join(".git"))?;
        std::fs::write(
            repo.join(".git/config"),
            "[remote \"origin\"]\n\turl = https://git.example.com/tool.git\n",
        )?;
        let (p, c, _) = classify_dir_metadata(&venv).unwrap();
        assert_eq!((p, c), (Provenance::Pip, Confidence::High));
        let (p, _, detail) = classify_dir_metadata(&repo).unwrap();
        assert_eq!(p, Provenance::Git);
        assert!(detail.contains("git.example.com"));
        assert!(classify_dir_metadata(&root.join("opt")).is_none());
        Ok(())
    }

    #[test]
    fn unknown_provenance_binary() -> Result<()> {
        // A file with no ecosystem metadata and no self-identifying
        // section ends up unknown/unknown.
        let td = tempfile::tempdir().unwrap();
        let bindir = td.path().join("usr/local/bin");
        std::fs::create_dir_all(&bindir)?;
        std::fs::write(bindir.join("mytool"), [0u8, 1, 2, 3, 4, 5])?;
        let ctx = InspectContext::for_test(td.path());
        let mut snapshot = Snapshot::new();
        NonPackageInspector.run(&ctx, &mut snapshot)?;
        let section = snapshot.non_package.unwrap();
        assert_eq!(section.items.len(), 1);
        let item = &section.items[0];
        assert_eq!(item.path, "usr/local/bin/mytool");
        assert_eq!(item.provenance, Provenance::Unknown);
        assert_eq!(item.confidence, Confidence::Unknown);
        Ok(())
    }

    #[test]
    fn scripts_are_low_confidence() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let bindir = td.path().join("usr/local/bin");
        std::fs::create_dir_all(&bindir)?;
        std::fs::write(bindir.join("helper"), "#!/usr/bin/python3\nprint('x')\n")?;
        let ctx = InspectContext::for_test(td.path());
        let mut snapshot = Snapshot::new();
        NonPackageInspector.run(&ctx, &mut snapshot)?;
        let item = &snapshot.non_package.unwrap().items[0];
        assert_eq!(item.confidence, Confidence::Low);
        assert!(item.detail.as_deref().unwrap().contains("python3"));
        Ok(())
    }
}
