//! SELinux state, audit rules, and PAM customizations.

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{InspectContext, Inspector};
use crate::snapshot::{SeBool, SecuritySection, Snapshot};

const NAME: &str = "security";

/// The module store priority operators install into.
const OPERATOR_PRIORITY: &str = "400";

/// Collects the security section.
#[derive(Debug)]
pub(crate) struct SecurityInspector;

/// Parse the policy configuration file.
pub(crate) fn parse_selinux_config(body: &str) -> (Option<String>, Option<String>) {
    let mut mode = None;
    let mut policy = None;
    for line in body.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some(v) = line.strip_prefix("SELINUX=") {
            mode = Some(v.trim().to_string());
        }
        if let Some(v) = line.strip_prefix("SELINUXTYPE=") {
            policy = Some(v.trim().to_string());
        }
    }
    (mode, policy)
}

/// Parse `booleans.local`: `name=1` or `name = 0` lines.
pub(crate) fn parse_booleans_local(body: &str) -> Vec<SeBool> {
    let mut ret = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else { continue };
        let value = match value.trim() {
            "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            _ => continue,
        };
        ret.push(SeBool {
            name: name.trim().to_string(),
            value,
        });
    }
    ret
}

impl Inspector for SecurityInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = SecuritySection::default();

        match ctx.read_optional("etc/selinux/config")? {
            Some(body) => {
                let (mode, policy) = parse_selinux_config(&body);
                section.mode = mode;
                section.policy_type = policy;
            }
            None => ctx.warnings.info(NAME, "No SELinux configuration present"),
        }

        let policy = section.policy_type.clone().unwrap_or_else(|| "targeted".into());
        let store = format!("var/lib/selinux/{policy}/active/modules/{OPERATOR_PRIORITY}");
        section.custom_modules = ctx.list_dir(&store)?;
        if !section.custom_modules.is_empty() {
            ctx.warnings.warn(
                NAME,
                format!(
                    "{} custom SELinux module(s) at operator priority; the policy sources \
                     must be re-applied in the image",
                    section.custom_modules.len()
                ),
            );
        }

        for candidate in [
            format!("etc/selinux/{policy}/active/booleans.local"),
            format!("var/lib/selinux/{policy}/active/booleans.local"),
        ] {
            if let Some(body) = ctx.read_optional(&candidate)? {
                section.booleans = parse_booleans_local(&body);
                break;
            }
        }

        for name in ctx.list_dir("etc/audit/rules.d")? {
            if !name.ends_with(".rules") {
                continue;
            }
            if let Some(f) = ctx.capture(NAME, format!("etc/audit/rules.d/{name}")) {
                section.audit_rules.push(f);
            }
        }

        // PAM customizations: stack files that fail package verification,
        // plus unowned drop-ins.
        let verify = ctx.rpm.verify().map(|v| v.to_vec()).unwrap_or_default();
        let owned = ctx.rpm.owned_paths().ok();
        let modified: Vec<Utf8PathBuf> = verify
            .iter()
            .filter(|v| v.path.starts_with("etc/pam.d") && v.flags != "missing")
            .map(|v| v.path.clone())
            .collect();
        for name in ctx.list_dir("etc/pam.d")? {
            let rel = Utf8PathBuf::from("etc/pam.d").join(&name);
            let is_modified = modified.contains(&rel);
            let is_unowned = owned.is_some_and(|o| !o.contains(&rel));
            if !is_modified && !is_unowned {
                continue;
            }
            if let Some(f) = ctx.capture(NAME, &rel) {
                section.pam.push(f);
            }
        }

        snapshot.security = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn selinux_config() {
        let body = indoc! { "
            # This file controls the state of SELinux on the system.
            SELINUX=enforcing
            SELINUXTYPE=targeted
        " };
        let (mode, policy) = parse_selinux_config(body);
        assert_eq!(mode.as_deref(), Some("enforcing"));
        assert_eq!(policy.as_deref(), Some("targeted"));
    }

    #[test]
    fn booleans() {
        let body = "httpd_can_network_connect=1\ncontainer_manage_cgroup = 0\n# x\n";
        let bools = parse_booleans_local(body);
        assert_eq!(bools.len(), 2);
        assert!(bools[0].value);
        assert_eq!(bools[1].name, "container_manage_cgroup");
        assert!(!bools[1].value);
    }

    #[test]
    fn custom_module_store() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let store = td.path().join("var/lib/selinux/targeted/active/modules/400");
        std::fs::create_dir_all(store.join("myapp"))?;
        std::fs::create_dir_all(td.path().join("etc/selinux"))?;
        std::fs::write(
            td.path().join("etc/selinux/config"),
            "SELINUX=enforcing\nSELINUXTYPE=targeted\n",
        )?;
        let ctx = InspectContext::for_test(td.path());
        let mut snapshot = Snapshot::new();
        SecurityInspector.run(&ctx, &mut snapshot)?;
        let section = snapshot.security.unwrap();
        assert_eq!(section.custom_modules, vec!["myapp"]);
        assert_eq!(section.mode.as_deref(), Some("enforcing"));
        Ok(())
    }
}
