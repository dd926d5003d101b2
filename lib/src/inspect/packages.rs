//! Package inventory and the delta against the baseline.

use std::collections::BTreeSet;

use anyhow::Result;

use super::{InspectContext, Inspector};
use crate::snapshot::{BaselineMode, PackagesSection, Snapshot};

const NAME: &str = "packages";

/// Enumerates installed packages and classifies them against the baseline.
#[derive(Debug)]
pub(crate) struct PackageInspector;

/// The provenance diff is pure set arithmetic on names:
/// added = host \ baseline, removed = baseline \ host.
pub(crate) fn compute_delta(
    host: &BTreeSet<String>,
    baseline: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let added = host.difference(baseline).cloned().collect();
    let removed = baseline.difference(host).cloned().collect();
    (added, removed)
}

impl Inspector for PackageInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn depends_on_baseline(&self) -> bool {
        true
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = PackagesSection::default();

        let installed = ctx.rpm.packages()?;
        section.installed = installed.to_vec();
        let host_names: BTreeSet<String> =
            installed.iter().map(|p| p.name.clone()).collect();
        // In all-packages mode the baseline set is empty, so the diff
        // degenerates to "everything was added", which is the advertised
        // behavior of that mode.
        let (added, removed) = compute_delta(&host_names, &ctx.baseline.packages);
        if ctx.baseline.mode == BaselineMode::AllPackages {
            tracing::debug!("all-packages mode: {} packages treated as added", added.len());
        }
        section.added = added;
        section.removed = removed;

        match ctx.rpm.verify() {
            Ok(entries) => section.verify = entries.to_vec(),
            Err(e) => {
                ctx.warnings
                    .info(NAME, format!("Package verification unavailable: {e:#}"));
                section.partial = true;
            }
        }

        for name in ctx.list_dir("etc/yum.repos.d")? {
            if !name.ends_with(".repo") {
                continue;
            }
            let path = format!("etc/yum.repos.d/{name}");
            if let Some(f) = ctx.capture(NAME, &path) {
                section.repo_files.push(f);
            }
        }

        match ctx.rpm.history_removed() {
            Ok(names) => section.install_history = names.to_vec(),
            Err(e) => {
                ctx.warnings
                    .info(NAME, format!("Transaction history unavailable: {e:#}"));
                section.partial = true;
            }
        }

        snapshot.packages = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn added_removed_diff() {
        // Host {a, b, c}, baseline {b, c, d}
        let (added, removed) = compute_delta(&set(&["a", "b", "c"]), &set(&["b", "c", "d"]));
        assert_eq!(added, vec!["a"]);
        assert_eq!(removed, vec!["d"]);
    }

    #[test]
    fn empty_baseline_adds_everything() {
        let (added, removed) = compute_delta(&set(&["a", "b"]), &set(&[]));
        assert_eq!(added, vec!["a", "b"]);
        assert!(removed.is_empty());
    }

    #[test]
    fn added_is_name_sorted() {
        let (added, _) = compute_delta(&set(&["zsh", "bash", "mc"]), &set(&[]));
        assert_eq!(added, vec!["bash", "mc", "zsh"]);
    }

    proptest::proptest! {
        /// added = H\B, removed = B\H, and the two are disjoint.
        #[test]
        fn set_arithmetic(h in proptest::collection::btree_set("[a-z]{1,6}", 0..20),
                          b in proptest::collection::btree_set("[a-z]{1,6}", 0..20)) {
            let (added, removed) = compute_delta(&h, &b);
            for name in &added {
                proptest::prop_assert!(h.contains(name) && !b.contains(name));
            }
            for name in &removed {
                proptest::prop_assert!(b.contains(name) && !h.contains(name));
            }
            let added: BTreeSet<_> = added.into_iter().collect();
            let removed: BTreeSet<_> = removed.into_iter().collect();
            proptest::prop_assert!(added.is_disjoint(&removed));
        }
    }
}
