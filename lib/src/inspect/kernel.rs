//! Kernel and boot configuration: command line, loaded modules, sysctl
//! divergence, dracut configuration.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{InspectContext, Inspector};
use crate::snapshot::{KernelSection, Snapshot, SysctlDivergence};

const NAME: &str = "kernel";

/// Collects the kernel section.
#[derive(Debug)]
pub(crate) struct KernelInspector;

/// Parse the loaded-module table and drop every module that is only
/// present as a dependency of another (it appears in a holders list),
/// plus everything explicitly configured to load.
pub(crate) fn nondefault_modules(proc_modules: &str, configured: &BTreeSet<String>) -> Vec<String> {
    let mut loaded = Vec::new();
    let mut dependencies: BTreeSet<String> = BTreeSet::new();
    for line in proc_modules.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        loaded.push(fields[0].to_string());
        // The fourth column lists the modules holding this one; anything
        // held was pulled in as a dependency.
        let holders = fields[3].trim_matches(',');
        if holders != "-" && !holders.is_empty() {
            dependencies.insert(fields[0].to_string());
        }
    }
    loaded
        .into_iter()
        .filter(|m| !dependencies.contains(m) && !configured.contains(m))
        .collect()
}

/// Parse `key = value` sysctl syntax, ignoring comments.
pub(crate) fn parse_sysctl(body: &str) -> BTreeMap<String, String> {
    let mut ret = BTreeMap::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            ret.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    ret
}

/// Keys set under the configuration root whose value differs from the
/// shipped default (or that have no shipped default at all).
pub(crate) fn sysctl_divergence(
    configured: &[(Utf8PathBuf, BTreeMap<String, String>)],
    defaults: &BTreeMap<String, String>,
) -> Vec<SysctlDivergence> {
    let mut ret = Vec::new();
    for (source, values) in configured {
        for (key, value) in values {
            let default = defaults.get(key);
            if default.map(|d| d == value).unwrap_or(false) {
                continue;
            }
            ret.push(SysctlDivergence {
                key: key.clone(),
                value: value.clone(),
                default: default.cloned(),
                source: source.clone(),
            });
        }
    }
    ret
}

fn parse_modules_load(body: &str) -> impl Iterator<Item = String> + '_ {
    body.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
        .map(|l| l.to_string())
}

impl Inspector for KernelInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = KernelSection::default();

        match ctx.read_optional("proc/cmdline")? {
            Some(cmdline) => section.cmdline = Some(cmdline.trim().to_string()),
            None => ctx.warnings.info(
                NAME,
                "Host /proc not visible through the mount; boot command line not captured",
            ),
        }

        let mut configured: BTreeSet<String> = BTreeSet::new();
        for name in ctx.list_dir("etc/modules-load.d")? {
            let rel = format!("etc/modules-load.d/{name}");
            if let Some(f) = ctx.capture(NAME, &rel) {
                configured.extend(parse_modules_load(f.content.as_deref().unwrap_or_default()));
                section.modules_load.push(f);
            }
        }

        match ctx.read_optional("proc/modules")? {
            Some(body) => section.modules = nondefault_modules(&body, &configured),
            None => {
                ctx.warnings
                    .info(NAME, "Loaded-module table not visible; module list not captured");
                section.partial = true;
            }
        }

        let mut defaults: BTreeMap<String, String> = BTreeMap::new();
        for name in ctx.list_dir("usr/lib/sysctl.d")? {
            if let Some(body) = ctx.read_optional(format!("usr/lib/sysctl.d/{name}"))? {
                defaults.extend(parse_sysctl(&body));
            }
        }
        let mut configured_sysctl: Vec<(Utf8PathBuf, BTreeMap<String, String>)> = Vec::new();
        if let Some(body) = ctx.read_optional("etc/sysctl.conf")? {
            configured_sysctl.push((Utf8PathBuf::from("etc/sysctl.conf"), parse_sysctl(&body)));
        }
        for name in ctx.list_dir("etc/sysctl.d")? {
            let rel = Utf8PathBuf::from("etc/sysctl.d").join(&name);
            if let Some(body) = ctx.read_optional(&rel)? {
                configured_sysctl.push((rel, parse_sysctl(&body)));
            }
        }
        section.sysctl = sysctl_divergence(&configured_sysctl, &defaults);

        for name in ctx.list_dir("etc/modprobe.d")? {
            if let Some(f) = ctx.capture(NAME, format!("etc/modprobe.d/{name}")) {
                section.modprobe.push(f);
            }
        }
        if let Some(f) = ctx.capture(NAME, "etc/dracut.conf") {
            section.dracut.push(f);
        }
        for name in ctx.list_dir("etc/dracut.conf.d")? {
            if let Some(f) = ctx.capture(NAME, format!("etc/dracut.conf.d/{name}")) {
                section.dracut.push(f);
            }
        }

        snapshot.kernel = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn module_dependency_filtering() {
        let body = indoc! { "
            nf_conntrack 172032 2 nf_nat,xt_conntrack, Live 0x0000000000000000
            nf_nat 57344 0 -, Live 0x0000000000000000
            xt_conntrack 16384 0 -, Live 0x0000000000000000
            wireguard 94208 0 -, Live 0x0000000000000000
            vfio 36864 0 -, Live 0x0000000000000000
        " };
        let configured: BTreeSet<String> = ["vfio".to_string()].into();
        let modules = nondefault_modules(body, &configured);
        // nf_conntrack is held by nf_nat/xt_conntrack, vfio is configured
        assert!(!modules.contains(&"nf_conntrack".to_string()));
        assert!(!modules.contains(&"vfio".to_string()));
        assert!(modules.contains(&"wireguard".to_string()));
        assert!(modules.contains(&"nf_nat".to_string()));
    }

    #[test]
    fn sysctl_divergence_with_attribution() {
        let defaults = parse_sysctl("net.ipv4.ip_forward = 0\nkernel.pid_max = 4194304\n");
        let configured = vec![(
            Utf8PathBuf::from("etc/sysctl.d/90-local.conf"),
            parse_sysctl("net.ipv4.ip_forward = 1\nkernel.pid_max = 4194304\nvm.swappiness = 10\n"),
        )];
        let div = sysctl_divergence(&configured, &defaults);
        assert_eq!(div.len(), 2);
        let forward = div.iter().find(|d| d.key == "net.ipv4.ip_forward").unwrap();
        assert_eq!(forward.value, "1");
        assert_eq!(forward.default.as_deref(), Some("0"));
        assert_eq!(forward.source, "etc/sysctl.d/90-local.conf");
        // A matching value is not divergent
        assert!(!div.iter().any(|d| d.key == "kernel.pid_max"));
        // No shipped default still counts as divergence
        assert!(div.iter().any(|d| d.key == "vm.swappiness" && d.default.is_none()));
    }
}
