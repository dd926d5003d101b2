//! Unit state collection and the enable/disable/mask action machine.

use std::collections::BTreeMap;

use anyhow::Result;

use super::{InspectContext, Inspector};
use crate::snapshot::{
    PresetState, ServiceAction, ServiceState, ServiceUnit, ServicesSection, Snapshot,
};
use crate::task::Task;

const NAME: &str = "services";

/// Collects unit states and computes the action to emit per unit.
#[derive(Debug)]
pub(crate) struct ServiceInspector;

/// The action table. Masking always overrides enable/disable; a unit
/// enabled on the host but absent from the baseline presets was
/// operator-added and must be enabled in the image.
pub(crate) fn service_action(state: ServiceState, preset: Option<PresetState>) -> ServiceAction {
    match (state, preset) {
        (ServiceState::Masked, _) => ServiceAction::Mask,
        (ServiceState::Static, _) => ServiceAction::None,
        (ServiceState::Enabled, Some(PresetState::Enabled)) => ServiceAction::None,
        (ServiceState::Enabled, _) => ServiceAction::Enable,
        (ServiceState::Disabled, Some(PresetState::Enabled)) => ServiceAction::Disable,
        (ServiceState::Disabled, _) => ServiceAction::None,
    }
}

fn parse_state(s: &str) -> Option<ServiceState> {
    match s {
        "enabled" => Some(ServiceState::Enabled),
        "disabled" => Some(ServiceState::Disabled),
        "masked" | "masked-runtime" => Some(ServiceState::Masked),
        "static" => Some(ServiceState::Static),
        _ => None,
    }
}

/// Parse `systemctl list-unit-files` output (two or three columns
/// depending on the systemd version).
pub(crate) fn parse_unit_files(out: &str) -> BTreeMap<String, ServiceState> {
    let mut ret = BTreeMap::new();
    for line in out.lines() {
        let mut fields = line.split_whitespace();
        let (Some(unit), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        if unit == "UNIT" || !unit.contains('.') {
            continue;
        }
        if let Some(state) = parse_state(state) {
            ret.insert(unit.to_string(), state);
        }
    }
    ret
}

/// Fallback unit-state scan when systemctl cannot run: walk the `.wants`
/// link farm, detect masks as links to the null device, and distinguish
/// static from disabled via the `[Install]` stanza.
fn fallback_scan(ctx: &InspectContext) -> Result<BTreeMap<String, ServiceState>> {
    let mut ret = BTreeMap::new();
    let etc = "etc/systemd/system";
    let mut plain_units = Vec::new();
    for name in ctx.list_dir(etc)? {
        let path = format!("{etc}/{name}");
        if name.ends_with(".wants") || name.ends_with(".requires") {
            for unit in ctx.list_dir(&path)? {
                if unit.contains('.') {
                    ret.insert(unit, ServiceState::Enabled);
                }
            }
            continue;
        }
        // read_link_contents: mask targets are absolute (/dev/null), which
        // the sandboxed read_link would reject.
        if let Ok(target) = ctx.root.read_link_contents(&path) {
            if target.as_os_str() == "/dev/null" {
                ret.insert(name, ServiceState::Masked);
            }
            continue;
        }
        if is_unit_name(&name) {
            plain_units.push((name, path));
        }
    }
    // Units not linked into a .wants farm are either static (no
    // [Install]) or disabled. Operator units live in etc, vendor units
    // under usr/lib.
    for (name, path) in plain_units {
        if ret.contains_key(&name) {
            continue;
        }
        if let Some(body) = ctx.read_optional(&path)? {
            ret.insert(name, install_state(&body));
        }
    }
    for name in ctx.list_dir("usr/lib/systemd/system")? {
        if ret.contains_key(&name) || !is_unit_name(&name) {
            continue;
        }
        let Some(body) = ctx.read_optional(format!("usr/lib/systemd/system/{name}"))? else {
            continue;
        };
        ret.insert(name, install_state(&body));
    }
    Ok(ret)
}

fn install_state(body: &str) -> ServiceState {
    if body.contains("[Install]") {
        ServiceState::Disabled
    } else {
        ServiceState::Static
    }
}

fn is_unit_name(name: &str) -> bool {
    [".service", ".timer", ".socket", ".path", ".target", ".mount"]
        .iter()
        .any(|s| name.ends_with(s))
}

fn preset_for(ctx: &InspectContext, unit: &str) -> Option<PresetState> {
    if ctx.baseline.preset_enabled.contains(unit) {
        Some(PresetState::Enabled)
    } else if ctx.baseline.preset_disabled.contains(unit) {
        Some(PresetState::Disabled)
    } else {
        None
    }
}

impl Inspector for ServiceInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn depends_on_baseline(&self) -> bool {
        true
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = ServicesSection::default();
        let states = match Task::new("Listing unit files", "systemctl")
            .args(["--root", ctx.root_path.as_str(), "list-unit-files", "--no-legend", "--no-pager"])
            .read()
        {
            Ok(out) => parse_unit_files(&out),
            Err(e) => {
                ctx.warnings.info(
                    NAME,
                    format!("systemctl listing failed ({e:#}); falling back to filesystem scan"),
                );
                section.fallback_scan = true;
                fallback_scan(ctx)?
            }
        };
        for (unit, state) in states {
            let preset = preset_for(ctx, &unit);
            let action = service_action(state, preset);
            if action == ServiceAction::None {
                continue;
            }
            section.units.push(ServiceUnit {
                name: unit,
                state,
                preset,
                action,
            });
        }
        snapshot.services = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn action_table_is_deterministic() {
        use PresetState as P;
        use ServiceAction as A;
        use ServiceState as S;
        let cases = [
            (S::Enabled, Some(P::Enabled), A::None),
            (S::Enabled, Some(P::Disabled), A::Enable),
            (S::Enabled, None, A::Enable),
            (S::Disabled, Some(P::Enabled), A::Disable),
            (S::Disabled, Some(P::Disabled), A::None),
            (S::Disabled, None, A::None),
            (S::Masked, Some(P::Enabled), A::Mask),
            (S::Masked, Some(P::Disabled), A::Mask),
            (S::Masked, None, A::Mask),
            (S::Static, Some(P::Enabled), A::None),
            (S::Static, Some(P::Disabled), A::None),
            (S::Static, None, A::None),
        ];
        for (state, preset, expected) in cases {
            assert_eq!(service_action(state, preset), expected, "{state:?}/{preset:?}");
        }
    }

    #[test]
    fn masked_overrides_enabled_default() {
        assert_eq!(
            service_action(ServiceState::Masked, Some(PresetState::Enabled)),
            ServiceAction::Mask
        );
    }

    #[test]
    fn unit_file_listing() {
        let out = indoc! { "
            UNIT FILE            STATE     PRESET
            sshd.service         enabled   enabled
            kdump.service        masked    enabled
            httpd.service        enabled   disabled
            getty@.service       static    -
            nfs-client.target    linked    -
        " };
        let states = parse_unit_files(out);
        assert_eq!(states.get("sshd.service"), Some(&ServiceState::Enabled));
        assert_eq!(states.get("kdump.service"), Some(&ServiceState::Masked));
        assert_eq!(states.get("getty@.service"), Some(&ServiceState::Static));
        // linked and the header line are skipped
        assert!(!states.contains_key("nfs-client.target"));
        assert!(!states.contains_key("UNIT"));
    }

    #[test]
    fn fallback_scan_detects_wants_and_masks() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        let unitdir = td.path().join("etc/systemd/system");
        std::fs::create_dir_all(unitdir.join("multi-user.target.wants"))?;
        std::os::unix::fs::symlink(
            "/usr/lib/systemd/system/httpd.service",
            unitdir.join("multi-user.target.wants/httpd.service"),
        )?;
        std::os::unix::fs::symlink("/dev/null", unitdir.join("kdump.service"))?;
        let vendor = td.path().join("usr/lib/systemd/system");
        std::fs::create_dir_all(&vendor)?;
        std::fs::write(
            vendor.join("crond.service"),
            "[Unit]\n[Service]\nExecStart=/usr/sbin/crond\n[Install]\nWantedBy=multi-user.target\n",
        )?;
        std::fs::write(vendor.join("dbus.service"), "[Unit]\n[Service]\n")?;
        let ctx = InspectContext::for_test(td.path());
        let states = fallback_scan(&ctx)?;
        assert_eq!(states.get("httpd.service"), Some(&ServiceState::Enabled));
        assert_eq!(states.get("kdump.service"), Some(&ServiceState::Masked));
        assert_eq!(states.get("crond.service"), Some(&ServiceState::Disabled));
        assert_eq!(states.get("dbus.service"), Some(&ServiceState::Static));
        Ok(())
    }
}
