//! The layered build recipe.
//!
//! Layer order is fixed and chosen so that the layers that change least
//! come first, which maximizes build-cache reuse across iterations of
//! the recipe. Every directive carries a comment explaining what was
//! detected; everything unresolved is marked FIXME.

use std::fmt::Write as _;

use crate::snapshot::{
    Confidence, ProfileClass, Provenance, ServiceAction, Snapshot, VarPlan,
};

use super::units::plan_timer_units;

/// Marker prefix for anything that needs operator attention.
pub(crate) const FIXME: &str = "# FIXME";

/// Render the Containerfile.
pub(crate) fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    header(&mut out, snapshot);
    build_stage(&mut out, snapshot);
    base_image(&mut out, snapshot);
    repo_files(&mut out, snapshot);
    packages(&mut out, snapshot);
    services(&mut out, snapshot);
    firewall(&mut out, snapshot);
    scheduled(&mut out, snapshot);
    config_tree(&mut out, snapshot);
    non_package(&mut out, snapshot);
    quadlets(&mut out, snapshot);
    users(&mut out, snapshot);
    kernel(&mut out, snapshot);
    selinux(&mut out, snapshot);
    network(&mut out, snapshot);
    tmpfiles(&mut out, snapshot);
    out
}

fn header(out: &mut String, snapshot: &Snapshot) {
    let _ = writeln!(out, "# Containerfile generated by reimage");
    if let Some(host) = snapshot.host.as_ref() {
        let _ = writeln!(
            out,
            "# Source host: {} ({} {}, {})",
            host.hostname, host.distro, host.version_id, host.arch
        );
        let _ = writeln!(out, "# Inspected: {}", host.inspected_at.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "#\n# This is a starting point, not a finished build. Review every\n\
         # FIXME below before building."
    );
    out.push('\n');
}

fn build_stage(out: &mut String, snapshot: &Snapshot) {
    let Some(np) = snapshot.non_package.as_ref() else { return };
    if !np.items.iter().any(|i| i.provenance == Provenance::Pip) {
        return;
    }
    let base = snapshot
        .target
        .as_ref()
        .map(|t| t.image.as_str())
        .unwrap_or("registry.access.redhat.com/ubi9/ubi");
    let _ = writeln!(
        out,
        "# Build stage for Python environments detected on the host.\n\
         {FIXME}: pin a requirements file per environment before relying on this stage.\n\
         FROM {base} AS pybuilder\n\
         RUN dnf -y install python3-pip python3-devel gcc && dnf clean all\n"
    );
}

fn base_image(out: &mut String, snapshot: &Snapshot) {
    match snapshot.target.as_ref() {
        Some(target) => {
            let _ = writeln!(out, "# Target base image ({:?} resolution)", target.source);
            if target.cross_major {
                let _ = writeln!(
                    out,
                    "{FIXME}: cross-major migration; verify package and service names"
                );
            }
            let _ = writeln!(out, "FROM {}\n", target.image);
        }
        None => {
            let _ = writeln!(
                out,
                "{FIXME}: no base image could be resolved for this host\nFROM scratch\n"
            );
        }
    }
}

fn repo_files(out: &mut String, snapshot: &Snapshot) {
    let Some(pkgs) = snapshot.packages.as_ref() else { return };
    if pkgs.repo_files.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "# Custom repository definitions found on the host\n\
         COPY config/etc/yum.repos.d/ /etc/yum.repos.d/\n"
    );
}

/// Wrap a package list into continuation lines.
fn wrap_list(names: &[String]) -> String {
    let mut lines = Vec::new();
    for chunk in names.chunks(6) {
        lines.push(format!("        {}", chunk.join(" ")));
    }
    lines.join(" \\\n")
}

fn packages(out: &mut String, snapshot: &Snapshot) {
    let Some(pkgs) = snapshot.packages.as_ref() else { return };
    if !pkgs.added.is_empty() {
        let _ = writeln!(
            out,
            "# {} package(s) present on the host but not in the base image",
            pkgs.added.len()
        );
        let _ = writeln!(
            out,
            "RUN dnf -y install \\\n{} \\\n    && dnf clean all\n",
            wrap_list(&pkgs.added)
        );
    }
    if !pkgs.removed.is_empty() {
        let _ = writeln!(
            out,
            "# {} base-image package(s) removed on the host",
            pkgs.removed.len()
        );
        let _ = writeln!(
            out,
            "RUN dnf -y remove \\\n{}\n",
            wrap_list(&pkgs.removed)
        );
    }
}

fn services(out: &mut String, snapshot: &Snapshot) {
    let Some(services) = snapshot.services.as_ref() else { return };
    let collect = |action: ServiceAction| -> Vec<String> {
        services
            .units
            .iter()
            .filter(|u| u.action == action)
            .map(|u| u.name.clone())
            .collect()
    };
    let enable = collect(ServiceAction::Enable);
    let disable = collect(ServiceAction::Disable);
    let mask = collect(ServiceAction::Mask);
    if enable.is_empty() && disable.is_empty() && mask.is_empty() {
        return;
    }
    let _ = writeln!(out, "# Unit state relative to the base image presets");
    let mut parts = Vec::new();
    if !enable.is_empty() {
        parts.push(format!("systemctl enable {}", enable.join(" ")));
    }
    if !disable.is_empty() {
        parts.push(format!("systemctl disable {}", disable.join(" ")));
    }
    if !mask.is_empty() {
        parts.push(format!("systemctl mask {}", mask.join(" ")));
    }
    let _ = writeln!(out, "RUN {}\n", parts.join(" && \\\n    "));
}

fn firewall(out: &mut String, snapshot: &Snapshot) {
    let Some(network) = snapshot.network.as_ref() else { return };
    let fw = &network.firewall;
    if fw.zones.is_empty() && fw.direct_rules.is_none() {
        return;
    }
    let _ = writeln!(
        out,
        "# Firewall zones captured from the host\nCOPY config/etc/firewalld/ /etc/firewalld/"
    );
    let _ = writeln!(out, "# Offline equivalents of the captured zone state:");
    for zone in &fw.zones {
        for svc in &zone.services {
            let _ = writeln!(
                out,
                "#   firewall-offline-cmd --zone={} --add-service={svc}",
                zone.name
            );
        }
        for port in &zone.ports {
            let _ = writeln!(
                out,
                "#   firewall-offline-cmd --zone={} --add-port={port}",
                zone.name
            );
        }
    }
    out.push('\n');
}

fn scheduled(out: &mut String, snapshot: &Snapshot) {
    let Some(sched) = snapshot.scheduled.as_ref() else { return };
    let generated = plan_timer_units(&sched.cron);
    let local_timers: Vec<&str> = sched
        .timers
        .iter()
        .filter(|t| t.scope == crate::snapshot::TimerScope::Local)
        .map(|t| t.name.as_str())
        .collect();
    if generated.is_empty() && local_timers.is_empty() && sched.at_jobs.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "# Scheduled tasks: operator timers plus cron jobs converted to timers\n\
         COPY config/etc/systemd/system/ /etc/systemd/system/"
    );
    let mut enables: Vec<String> = local_timers.iter().map(|t| t.to_string()).collect();
    enables.extend(generated.iter().map(|g| format!("{}.timer", g.base)));
    enables.sort();
    enables.dedup();
    if !enables.is_empty() {
        let _ = writeln!(out, "RUN systemctl enable {}", enables.join(" "));
    }
    for entry in sched.cron.iter().filter(|c| c.on_calendar.is_none()) {
        let _ = writeln!(
            out,
            "{FIXME}: cron entry in /{} could not be converted: '{} {}'",
            entry.source, entry.schedule, entry.command
        );
    }
    for job in &sched.at_jobs {
        let _ = writeln!(
            out,
            "{FIXME}: pending at-job in /{} has no image equivalent{}",
            job.path,
            job.command
                .as_deref()
                .map(|c| format!(" (command: {c})"))
                .unwrap_or_default()
        );
    }
    out.push('\n');
}

fn config_tree(out: &mut String, snapshot: &Snapshot) {
    let Some(configs) = snapshot.configs.as_ref() else { return };
    let total = configs.modified.len() + configs.unowned.len() + configs.orphaned.len();
    if total == 0 {
        return;
    }
    let _ = writeln!(
        out,
        "# Consolidated configuration tree: {} modified, {} unowned, {} orphaned file(s)",
        configs.modified.len(),
        configs.unowned.len(),
        configs.orphaned.len()
    );
    for orphan in &configs.orphaned {
        let _ = writeln!(
            out,
            "{FIXME}: /{} belonged to removed package '{}'; drop it if unused",
            orphan.file.path, orphan.package
        );
    }
    let _ = writeln!(out, "COPY config/etc/ /etc/\n");
}

fn non_package(out: &mut String, snapshot: &Snapshot) {
    let Some(np) = snapshot.non_package.as_ref() else { return };
    if np.items.is_empty() {
        return;
    }
    let _ = writeln!(out, "# Software installed outside the package manager");
    for item in &np.items {
        match (item.provenance, item.confidence) {
            (Provenance::Pip, Confidence::High) => {
                let _ = writeln!(
                    out,
                    "# Python environment at /{} ({})\n\
                     RUN python3 -m venv /{0} && /{0}/bin/pip install --upgrade pip\n\
                     {FIXME}: install the package set for /{0} from a pinned requirements file",
                    item.path,
                    item.detail.as_deref().unwrap_or("pip")
                );
            }
            (Provenance::Npm, _) => {
                let _ = writeln!(
                    out,
                    "# Node application at /{} ({})\n\
                     COPY {} /{}\n\
                     RUN cd /{} && npm ci --omit=dev",
                    item.path,
                    item.detail.as_deref().unwrap_or("npm"),
                    build_context_path(item),
                    item.path,
                    item.path
                );
            }
            (Provenance::Gem, _) => {
                let _ = writeln!(
                    out,
                    "# Ruby application at /{} ({})\n\
                     COPY {} /{}\n\
                     RUN cd /{} && bundle install --deployment",
                    item.path,
                    item.detail.as_deref().unwrap_or("gem"),
                    build_context_path(item),
                    item.path,
                    item.path
                );
            }
            (Provenance::Git, _) => {
                let _ = writeln!(
                    out,
                    "{FIXME}: /{} is a git checkout ({}); clone or vendor it explicitly\n\
                     # COPY {} /{}",
                    item.path,
                    item.detail.as_deref().unwrap_or("no remote"),
                    build_context_path(item),
                    item.path
                );
            }
            (Provenance::GoBinary | Provenance::RustBinary, _) => {
                let _ = writeln!(
                    out,
                    "# Compiled {} binary at /{}{}\n\
                     {FIXME}: rebuild from source in a build stage, or stage the binary\n\
                     COPY {} /{}",
                    provenance_label(item.provenance),
                    item.path,
                    item.version
                        .as_deref()
                        .map(|v| format!(" (version string: {v})"))
                        .unwrap_or_default(),
                    build_context_path(item),
                    item.path
                );
            }
            (Provenance::CBinary, _) => {
                let _ = writeln!(
                    out,
                    "# Native binary at /{} ({} shared libs listed)\n\
                     {FIXME}: confirm its runtime dependencies are installed above\n\
                     COPY {} /{}",
                    item.path,
                    item.needed_libs.len(),
                    build_context_path(item),
                    item.path
                );
            }
            (Provenance::Pip, _) | (Provenance::Unknown, _) => {
                let _ = writeln!(
                    out,
                    "{FIXME}: unknown provenance for /{}{}; verify before shipping\n\
                     COPY {} /{}",
                    item.path,
                    item.detail
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default(),
                    build_context_path(item),
                    item.path
                );
            }
        }
    }
    let _ = writeln!(
        out,
        "# Stage the files referenced above into the build context before building.\n"
    );
}

fn provenance_label(p: Provenance) -> &'static str {
    match p {
        Provenance::GoBinary => "Go",
        Provenance::RustBinary => "Rust",
        _ => "native",
    }
}

/// Where a non-package artifact is expected inside the build context.
fn build_context_path(item: &crate::snapshot::NonPackageItem) -> String {
    format!("config/{}", item.path)
}

fn quadlets(out: &mut String, snapshot: &Snapshot) {
    let Some(containers) = snapshot.containers.as_ref() else { return };
    if containers.quadlets.is_empty() && containers.compose_files.is_empty() {
        return;
    }
    if !containers.quadlets.is_empty() {
        let _ = writeln!(
            out,
            "# Container workloads as quadlet units\n\
             COPY quadlet/ /etc/containers/systemd/"
        );
    }
    for compose in &containers.compose_files {
        let _ = writeln!(
            out,
            "{FIXME}: compose file /{} ({} service(s)) needs conversion to quadlet units",
            compose.path,
            compose.services.len()
        );
        for (svc, image) in &compose.services {
            let _ = writeln!(out, "#   service '{svc}' runs image {image}");
        }
    }
    out.push('\n');
}

fn users(out: &mut String, snapshot: &Snapshot) {
    let Some(users) = snapshot.users.as_ref() else { return };
    if users.passwd.is_empty() && users.group.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "# Append-based user/group provisioning ({} user(s), {} group(s))",
        users.passwd.len(),
        users.group.len()
    );
    let _ = writeln!(
        out,
        "{FIXME}: shadow entries are locked placeholders; inject real credentials at deploy time"
    );
    let _ = writeln!(out, "COPY config/tmp/ /tmp/account-fragments/");
    let _ = writeln!(
        out,
        "RUN for f in passwd group shadow subuid subgid; do \\\n\
         \x20       if [ -f /tmp/account-fragments/$f.append ]; then \\\n\
         \x20           cat /tmp/account-fragments/$f.append >> /etc/$f; \\\n\
         \x20       fi; \\\n\
         \x20   done && rm -rf /tmp/account-fragments"
    );
    for (line, home) in users
        .passwd
        .iter()
        .filter_map(|l| Some((l, l.split(':').nth(5)?.to_string())))
        .filter(|(_, h)| h.starts_with("/home"))
    {
        let name = line.split(':').next().unwrap_or_default();
        let _ = writeln!(out, "RUN mkdir -p {home} && chown {name}: {home}");
    }
    for sudo in &users.sudoers {
        let _ = writeln!(
            out,
            "{FIXME}: sudoers drop-in /{} carried via the config tree; review its rules",
            sudo.path
        );
    }
    out.push('\n');
}

fn kernel(out: &mut String, snapshot: &Snapshot) {
    let Some(kernel) = snapshot.kernel.as_ref() else { return };
    if kernel.sysctl.is_empty() && kernel.modules.is_empty() && kernel.cmdline.is_none() {
        return;
    }
    let _ = writeln!(out, "# Kernel tuning detected on the host");
    for s in &kernel.sysctl {
        let _ = writeln!(
            out,
            "#   {} = {} (from /{}{})",
            s.key,
            s.value,
            s.source,
            s.default
                .as_deref()
                .map(|d| format!(", default {d}"))
                .unwrap_or_else(|| ", no shipped default".into())
        );
    }
    if !kernel.sysctl.is_empty() {
        let _ = writeln!(out, "# Values ride along in config/etc/sysctl.d/");
    }
    if !kernel.modules.is_empty() {
        let _ = writeln!(
            out,
            "{FIXME}: modules loaded outside any modules-load.d config: {}",
            kernel.modules.join(", ")
        );
    }
    if let Some(cmdline) = kernel.cmdline.as_deref() {
        let _ = writeln!(
            out,
            "# Boot command line on the host (carry kargs via a kargs.d drop-in if needed):\n#   {cmdline}"
        );
    }
    out.push('\n');
}

fn selinux(out: &mut String, snapshot: &Snapshot) {
    let Some(security) = snapshot.security.as_ref() else { return };
    if security.booleans.is_empty() && security.custom_modules.is_empty() {
        return;
    }
    let _ = writeln!(out, "# SELinux customizations");
    if !security.booleans.is_empty() {
        let bools = security
            .booleans
            .iter()
            .map(|b| format!("{}={}", b.name, if b.value { "1" } else { "0" }))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(out, "RUN setsebool -P -N {bools}");
    }
    for module in &security.custom_modules {
        let _ = writeln!(
            out,
            "{FIXME}: custom policy module '{module}' must be rebuilt from its .pp or .cil source"
        );
    }
    out.push('\n');
}

fn network(out: &mut String, snapshot: &Snapshot) {
    let Some(network) = snapshot.network.as_ref() else { return };
    let static_profiles: Vec<_> = network
        .profiles
        .iter()
        .filter(|p| p.class == ProfileClass::Static)
        .collect();
    let dynamic = network.profiles.len() - static_profiles.len();
    if network.profiles.is_empty() && network.hosts_additions.is_empty() && network.proxy.is_empty()
    {
        return;
    }
    let _ = writeln!(out, "# Network configuration");
    for p in &static_profiles {
        let _ = writeln!(
            out,
            "# Static profile '{}' baked into the image\nCOPY config/{} /{}",
            p.name, p.file.path, p.file.path
        );
    }
    if dynamic > 0 {
        let _ = writeln!(
            out,
            "# {dynamic} dynamic profile(s) deferred to deploy time; see kickstart-suggestion.ks"
        );
    }
    for line in &network.hosts_additions {
        let _ = writeln!(out, "RUN echo '{line}' >> /etc/hosts");
    }
    for (key, value) in &network.proxy {
        let _ = writeln!(out, "ENV {key}={value}");
    }
    if !network.routes.is_empty() {
        let _ = writeln!(
            out,
            "{FIXME}: static routes present; translate to connection-profile properties:"
        );
        for r in &network.routes {
            let _ = writeln!(out, "#   {r}");
        }
    }
    out.push('\n');
}

fn tmpfiles(out: &mut String, snapshot: &Snapshot) {
    let Some(storage) = snapshot.storage.as_ref() else { return };
    let migrate: Vec<_> = storage
        .var_usage
        .iter()
        .filter(|u| u.plan == VarPlan::Migrate)
        .collect();
    let declared = storage.var_usage.iter().any(|u| u.plan == VarPlan::Tmpfiles);
    if !declared && migrate.is_empty() {
        return;
    }
    if declared {
        let _ = writeln!(
            out,
            "# Mutable-state directory structure, recreated on every boot\n\
             COPY config/etc/tmpfiles.d/ /etc/tmpfiles.d/"
        );
    }
    for m in migrate {
        let _ = writeln!(
            out,
            "{FIXME}: /{} holds ~{} KiB of runtime state; it needs a migration plan, not an image layer",
            m.path,
            m.approx_bytes / 1024
        );
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::*;

    fn base_snapshot() -> Snapshot {
        let mut s = Snapshot::new();
        s.target = Some(TargetImage {
            image: "quay.io/centos-bootc/centos-bootc:stream9".into(),
            source: TargetSource::Auto,
            cross_major: false,
        });
        s.sealed = true;
        s
    }

    #[test]
    fn package_directives() {
        let mut s = base_snapshot();
        s.packages = Some(PackagesSection {
            added: vec!["a".into()],
            removed: vec!["d".into()],
            ..Default::default()
        });
        let out = render(&s);
        assert!(out.contains("FROM quay.io/centos-bootc/centos-bootc:stream9"));
        assert!(out.contains("dnf -y install"));
        assert!(out.contains("        a"));
        assert!(out.contains("dnf -y remove"));
        assert!(out.contains("        d"));
    }

    #[test]
    fn service_directives() {
        let mut s = base_snapshot();
        s.services = Some(ServicesSection {
            units: vec![
                ServiceUnit {
                    name: "httpd.service".into(),
                    state: ServiceState::Enabled,
                    preset: None,
                    action: ServiceAction::Enable,
                },
                ServiceUnit {
                    name: "kdump.service".into(),
                    state: ServiceState::Masked,
                    preset: Some(PresetState::Enabled),
                    action: ServiceAction::Mask,
                },
            ],
            ..Default::default()
        });
        let out = render(&s);
        assert!(out.contains("systemctl enable httpd.service"));
        assert!(out.contains("systemctl mask kdump.service"));
    }

    #[test]
    fn unknown_provenance_gets_fixme_adjacent_to_copy() {
        let mut s = base_snapshot();
        s.non_package = Some(NonPackageSection {
            items: vec![NonPackageItem {
                path: "usr/local/bin/mytool".into(),
                provenance: Provenance::Unknown,
                confidence: Confidence::Unknown,
                version: None,
                detail: None,
                needed_libs: vec![],
            }],
            ..Default::default()
        });
        let out = render(&s);
        let fixme_line = out
            .lines()
            .position(|l| l.starts_with("# FIXME") && l.contains("usr/local/bin/mytool"))
            .expect("fixme present");
        let copy_line = out
            .lines()
            .position(|l| l.starts_with("COPY") && l.contains("usr/local/bin/mytool"))
            .expect("copy present");
        assert_eq!(copy_line, fixme_line + 1);
    }

    #[test]
    fn deterministic() {
        let mut s = base_snapshot();
        s.packages = Some(PackagesSection {
            added: vec!["a".into(), "b".into()],
            ..Default::default()
        });
        similar_asserts::assert_eq!(render(&s), render(&s));
    }

    #[test]
    fn missing_target_is_marked() {
        let mut s = base_snapshot();
        s.target = None;
        let out = render(&s);
        assert!(out.contains("# FIXME: no base image could be resolved"));
    }
}
