//! The inspection pipeline.
//!
//! Twelve collectors run against the read-only host root; each owns a
//! disjoint section of the snapshot and reports through the shared
//! warning sink. The baseline is resolved before any inspector that
//! depends on it runs; the redaction pass runs after all inspectors
//! complete.

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;

use crate::rpmq::RpmAdapter;
use crate::snapshot::{Baseline, CapturedFile, Snapshot};
use crate::warnings::WarningSink;

pub(crate) mod configs;
pub(crate) mod containers;
pub(crate) mod kernel;
pub(crate) mod network;
pub(crate) mod nonpkg;
pub(crate) mod packages;
pub(crate) mod scheduled;
pub(crate) mod security;
pub(crate) mod services;
pub(crate) mod storage;
pub(crate) mod users;

/// Behavior toggles threaded from the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct InspectOptions {
    pub(crate) config_diffs: bool,
    pub(crate) deep_binary_scan: bool,
    pub(crate) query_podman: bool,
}

/// Host-namespace data prefetched through the privilege bridge before the
/// inspectors run. Inspectors themselves never cross the boundary.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveData {
    /// `ip route` output, when the bridge was available.
    pub(crate) routes: Option<String>,
    /// `ip rule` output, when the bridge was available.
    pub(crate) route_rules: Option<String>,
    /// `podman ps --format json` output, when requested and available.
    pub(crate) podman_ps: Option<String>,
}

/// Everything an inspector gets to see.
#[derive(Debug)]
pub(crate) struct InspectContext {
    /// The read-only host root.
    pub(crate) root: Dir,
    /// Ambient path of the host root, for recursive walks.
    pub(crate) root_path: Utf8PathBuf,
    pub(crate) opts: InspectOptions,
    pub(crate) baseline: Baseline,
    pub(crate) warnings: WarningSink,
    pub(crate) rpm: RpmAdapter,
    pub(crate) live: LiveData,
}

impl InspectContext {
    pub(crate) fn new(
        root_path: Utf8PathBuf,
        opts: InspectOptions,
        baseline: Baseline,
        warnings: WarningSink,
        live: LiveData,
    ) -> Result<Self> {
        let root = Dir::open_ambient_dir(&root_path, cap_std::ambient_authority())
            .with_context(|| format!("Opening host root {root_path}"))?;
        let rpm = RpmAdapter::new(root_path.clone());
        Ok(Self {
            root,
            root_path,
            opts,
            baseline,
            warnings,
            rpm,
            live,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_test(root_path: &std::path::Path) -> Self {
        let root_path = Utf8PathBuf::try_from(root_path.to_path_buf()).unwrap();
        let root = Dir::open_ambient_dir(&root_path, cap_std::ambient_authority()).unwrap();
        let rpm = RpmAdapter::new(root_path.clone());
        Self {
            root,
            root_path,
            opts: InspectOptions::default(),
            baseline: Baseline {
                packages: Default::default(),
                preset_enabled: Default::default(),
                preset_disabled: Default::default(),
                mode: crate::snapshot::BaselineMode::AllPackages,
            },
            warnings: WarningSink::new(),
            rpm,
            live: LiveData::default(),
        }
    }

    /// Read a file under the host root, tolerating absence. Non-UTF8
    /// bytes are replaced; captured configuration is treated as text.
    pub(crate) fn read_optional(&self, path: impl AsRef<Utf8Path>) -> Result<Option<String>> {
        let path = path.as_ref();
        let Some(mut f) = self
            .root
            .open_optional(path)
            .with_context(|| format!("Opening {path}"))?
        else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut f, &mut buf).with_context(|| format!("Reading {path}"))?;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Capture a file under the host root, or emit an info warning from
    /// `source` when it is missing or unreadable.
    pub(crate) fn capture(&self, source: &str, path: impl AsRef<Utf8Path>) -> Option<CapturedFile> {
        let path = path.as_ref();
        match self.read_optional(path) {
            Ok(Some(content)) => Some(CapturedFile::new(path, content)),
            Ok(None) => None,
            Err(e) => {
                self.warnings
                    .info(source, format!("Could not read {path}: {e:#}"));
                None
            }
        }
    }

    /// List file names in a directory under the host root, sorted.
    /// A missing directory yields an empty list.
    pub(crate) fn list_dir(&self, path: impl AsRef<Utf8Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let Some(dir) = self
            .root
            .open_dir_optional(path)
            .with_context(|| format!("Opening {path}"))?
        else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for entry in dir.entries()? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// One of the collectors contributing a named section to the snapshot.
pub(crate) trait Inspector: std::fmt::Debug {
    /// Stable name; used as the warning source.
    fn name(&self) -> &'static str;
    /// Whether the collector consumes the resolved baseline.
    fn depends_on_baseline(&self) -> bool {
        false
    }
    /// Populate this collector's snapshot section.
    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()>;
}

/// The static registry, in execution order.
pub(crate) fn registry() -> Vec<Box<dyn Inspector>> {
    vec![
        Box::new(packages::PackageInspector),
        Box::new(services::ServiceInspector),
        Box::new(configs::ConfigInspector),
        Box::new(network::NetworkInspector),
        Box::new(storage::StorageInspector),
        Box::new(scheduled::ScheduledInspector),
        Box::new(containers::ContainerInspector),
        Box::new(nonpkg::NonPackageInspector),
        Box::new(kernel::KernelInspector),
        Box::new(security::SecurityInspector),
        Box::new(users::UserInspector),
    ]
}

/// Run every registered inspector. Inspectors never abort the pipeline: a
/// failure becomes an error-level warning and the run continues.
pub(crate) fn run_all(ctx: &InspectContext, snapshot: &mut Snapshot) {
    for inspector in registry() {
        let name = inspector.name();
        tracing::debug!(
            "running inspector {name}{}",
            if inspector.depends_on_baseline() {
                " (consumes the resolved baseline)"
            } else {
                ""
            }
        );
        if let Err(e) = inspector.run(ctx, snapshot) {
            ctx.warnings
                .error(name, format!("Inspector failed: {e:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let names: Vec<_> = registry().iter().map(|i| i.name()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn baseline_dependencies_declared() {
        let deps: Vec<_> = registry()
            .iter()
            .filter(|i| i.depends_on_baseline())
            .map(|i| i.name())
            .collect();
        assert_eq!(deps, vec!["packages", "services"]);
    }

    #[test]
    fn context_reads_are_tolerant() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("present"), "body").unwrap();
        let ctx = InspectContext::for_test(td.path());
        assert_eq!(ctx.read_optional("present").unwrap().as_deref(), Some("body"));
        assert_eq!(ctx.read_optional("absent").unwrap(), None);
        assert!(ctx.capture("test", "absent").is_none());
        assert!(ctx.list_dir("nodir").unwrap().is_empty());
    }
}
