//! Mount table, logical volumes, automount maps, and usage of the
//! mutable state root.

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{InspectContext, Inspector};
use crate::snapshot::{
    LogicalVolume, MountEntry, MountStrategy, Snapshot, StorageSection, VarPlan, VarUsage,
};

const NAME: &str = "storage";

/// Directories small enough to seed into the image. Anything larger gets
/// a migration-plan entry instead.
const SEED_LIMIT: u64 = 1_048_576;

/// Collects the storage section.
#[derive(Debug)]
pub(crate) struct StorageInspector;

const PSEUDO_FS: &[&str] = &[
    "proc", "sysfs", "devpts", "devtmpfs", "cgroup", "cgroup2", "securityfs", "debugfs",
    "configfs", "bpf", "autofs",
];
const NETWORK_FS: &[&str] = &["nfs", "nfs4", "cifs", "smbfs", "glusterfs", "ceph"];

/// Recommend a migration strategy for one mount.
pub(crate) fn mount_strategy(target: &str, fstype: &str) -> MountStrategy {
    if PSEUDO_FS.contains(&fstype) {
        return MountStrategy::Ignore;
    }
    if fstype == "swap" || fstype == "tmpfs" {
        return MountStrategy::MachineLocal;
    }
    if NETWORK_FS.contains(&fstype) {
        return MountStrategy::External;
    }
    if target == "/" || target == "/boot" || target == "/boot/efi" {
        return MountStrategy::Image;
    }
    if ["/usr", "/opt"].iter().any(|p| target.starts_with(p)) {
        return MountStrategy::Image;
    }
    if ["/var", "/srv", "/home", "/data"]
        .iter()
        .any(|p| target.starts_with(p))
    {
        return MountStrategy::Volume;
    }
    MountStrategy::Volume
}

/// Parse the static mount table.
pub(crate) fn parse_fstab(body: &str) -> Vec<MountEntry> {
    let mut ret = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (source, target, fstype, options) = (fields[0], fields[1], fields[2], fields[3]);
        ret.push(MountEntry {
            source: source.to_string(),
            target: target.to_string(),
            fstype: fstype.to_string(),
            options: options.to_string(),
            strategy: mount_strategy(target, fstype),
        });
    }
    ret
}

/// Extract volume-group/logical-volume names from an lvm metadata backup
/// document. The format is nested `key { ... }` blocks; the volume group
/// is the sole top-level block and logical volumes are the blocks one
/// level below `logical_volumes`.
pub(crate) fn parse_lvm_backup(body: &str) -> Vec<LogicalVolume> {
    let mut ret = Vec::new();
    let mut vg: Option<String> = None;
    let mut depth = 0usize;
    let mut in_lvs_at: Option<usize> = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_suffix('{').map(|s| s.trim()) {
            if !name.is_empty() && !name.contains(' ') {
                if depth == 0 && vg.is_none() {
                    vg = Some(name.to_string());
                } else if name == "logical_volumes" {
                    in_lvs_at = Some(depth);
                } else if let (Some(lvd), Some(vg)) = (in_lvs_at, vg.as_ref()) {
                    if depth == lvd + 1 {
                        ret.push(LogicalVolume {
                            vg: vg.clone(),
                            name: name.to_string(),
                        });
                    }
                }
            }
            depth += 1;
        } else if line == "}" {
            depth = depth.saturating_sub(1);
            if in_lvs_at == Some(depth) {
                in_lvs_at = None;
            }
        }
    }
    ret
}

fn dir_size(path: &Utf8PathBuf) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn var_plan(bytes: u64) -> VarPlan {
    if bytes == 0 {
        VarPlan::Tmpfiles
    } else if bytes <= SEED_LIMIT {
        VarPlan::Seed
    } else {
        VarPlan::Migrate
    }
}

impl Inspector for StorageInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = StorageSection::default();

        match ctx.read_optional("etc/fstab")? {
            Some(body) => section.mounts = parse_fstab(&body),
            None => ctx.warnings.info(NAME, "No fstab present"),
        }

        for name in ctx.list_dir("etc/lvm/backup")? {
            if let Some(body) = ctx.read_optional(format!("etc/lvm/backup/{name}"))? {
                section.logical_volumes.extend(parse_lvm_backup(&body));
            }
        }

        if ctx.read_optional("etc/auto.master")?.is_some() {
            for name in ctx.list_dir("etc")? {
                if name.starts_with("auto.") {
                    if let Some(f) = ctx.capture(NAME, format!("etc/{name}")) {
                        section.automount_maps.push(f);
                    }
                }
            }
        }

        for base in ["var/lib", "var/log"] {
            for name in ctx.list_dir(base)? {
                let rel = Utf8PathBuf::from(base).join(&name);
                let abs = ctx.root_path.join(&rel);
                if !abs.is_dir() {
                    continue;
                }
                let approx_bytes = dir_size(&abs);
                section.var_usage.push(VarUsage {
                    path: rel,
                    approx_bytes,
                    plan: var_plan(approx_bytes),
                });
            }
        }
        section.var_usage.sort_by(|a, b| a.path.cmp(&b.path));

        snapshot.storage = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn fstab_strategies() {
        let body = indoc! { "
            # /etc/fstab
            UUID=aaaa  /          xfs    defaults  0 0
            UUID=bbbb  /boot      xfs    defaults  0 0
            UUID=cccc  swap       swap   defaults  0 0
            nas:/vol/data  /data  nfs4   ro        0 0
            UUID=dddd  /var/lib/pgsql  xfs  defaults  0 0
            tmpfs      /tmp       tmpfs  defaults  0 0
        " };
        let mounts = parse_fstab(body);
        assert_eq!(mounts.len(), 6);
        assert_eq!(mounts[0].strategy, MountStrategy::Image);
        assert_eq!(mounts[1].strategy, MountStrategy::Image);
        assert_eq!(mounts[2].strategy, MountStrategy::MachineLocal);
        assert_eq!(mounts[3].strategy, MountStrategy::External);
        assert_eq!(mounts[4].strategy, MountStrategy::Volume);
        assert_eq!(mounts[5].strategy, MountStrategy::MachineLocal);
    }

    #[test]
    fn lvm_backup_names() {
        let body = indoc! { "
            contents = \"Text Format Volume Group\"
            vg0 {
                id = \"xxx\"
                physical_volumes {
                    pv0 {
                        id = \"yyy\"
                    }
                }
                logical_volumes {
                    root {
                        id = \"zzz\"
                        segment1 {
                        }
                    }
                    swap {
                        id = \"www\"
                    }
                }
            }
        " };
        let lvs = parse_lvm_backup(body);
        assert_eq!(lvs.len(), 2);
        assert_eq!(lvs[0].vg, "vg0");
        assert_eq!(lvs[0].name, "root");
        assert_eq!(lvs[1].name, "swap");
    }

    #[test]
    fn var_plans() {
        assert_eq!(var_plan(0), VarPlan::Tmpfiles);
        assert_eq!(var_plan(1000), VarPlan::Seed);
        assert_eq!(var_plan(50 * 1_048_576), VarPlan::Migrate);
    }
}
