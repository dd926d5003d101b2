//! The definition of the inspection snapshot.
//!
//! The snapshot is the single persistent artifact between the inspection
//! half and the rendering half. It is constructed once per run, sealed
//! after the redaction pass, and read-only from then on. Renderers are
//! pure functions of a sealed snapshot; re-render mode loads one from
//! disk and skips inspection entirely.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk snapshot format.
pub const FORMAT_VERSION: u32 = 1;

/// Snapshot file name inside the output directory.
pub const SNAPSHOT_FILENAME: &str = "inspection-snapshot.json";

/// The composite document produced by the inspectors.
///
/// Every section is optional; an absent section means "not inspected".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Version of the serialized shape; bumped on incompatible change.
    pub format_version: u32,
    /// Host identity.
    pub host: Option<HostInfo>,
    /// The resolved target base image.
    pub target: Option<TargetImage>,
    /// The resolved baseline (target image package/preset state).
    pub baseline: Option<Baseline>,
    /// Installed package inventory and the delta against the baseline.
    pub packages: Option<PackagesSection>,
    /// systemd unit state and emitted actions.
    pub services: Option<ServicesSection>,
    /// Captured configuration files.
    pub configs: Option<ConfigsSection>,
    /// Network configuration.
    pub network: Option<NetworkSection>,
    /// Mounts, volumes and mutable-state usage.
    pub storage: Option<StorageSection>,
    /// Cron entries, timer units, at jobs.
    pub scheduled: Option<ScheduledSection>,
    /// Container workloads.
    pub containers: Option<ContainersSection>,
    /// Software installed outside the package manager.
    pub non_package: Option<NonPackageSection>,
    /// Kernel and boot configuration.
    pub kernel: Option<KernelSection>,
    /// SELinux state.
    pub security: Option<SecuritySection>,
    /// Non-system users and groups.
    pub users: Option<UsersSection>,
    /// Ordered warning events from all inspectors.
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Ordered redaction events.
    #[serde(default)]
    pub secrets_review: Vec<SecretEvent>,
    /// Set once the redaction pass has completed; renderers refuse to
    /// consume a snapshot without it.
    #[serde(default)]
    pub sealed: bool,
}

impl Snapshot {
    /// Create an empty, unsealed snapshot.
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            ..Default::default()
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(self)?;
        buf.push('\n');
        Ok(buf)
    }

    /// Load a previously sealed snapshot from a file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;
        let snapshot: Self =
            serde_json::from_str(&buf).with_context(|| format!("Parsing {path}"))?;
        if snapshot.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported snapshot format version {} (expected {FORMAT_VERSION})",
                snapshot.format_version
            );
        }
        if !snapshot.sealed {
            anyhow::bail!("Refusing to load an unsealed snapshot from {path}");
        }
        Ok(snapshot)
    }

    /// Visit every captured file in the document, in the same traversal
    /// order as [`Self::visit_files_mut`]. Renderers use this to mirror
    /// the configuration tree.
    pub(crate) fn visit_files(&self, mut f: impl FnMut(&CapturedFile)) {
        // Kept textually parallel with visit_files_mut.
        if let Some(p) = self.packages.as_ref() {
            p.repo_files.iter().for_each(&mut f);
        }
        if let Some(c) = self.configs.as_ref() {
            for m in c.modified.iter() {
                f(&m.file);
            }
            c.unowned.iter().for_each(&mut f);
            for o in c.orphaned.iter() {
                f(&o.file);
            }
        }
        if let Some(n) = self.network.as_ref() {
            for p in n.profiles.iter() {
                f(&p.file);
            }
            for z in n.firewall.zones.iter() {
                f(&z.file);
            }
            if let Some(d) = n.firewall.direct_rules.as_ref() {
                f(d);
            }
        }
        if let Some(s) = self.storage.as_ref() {
            s.automount_maps.iter().for_each(&mut f);
        }
        if let Some(s) = self.scheduled.as_ref() {
            s.timer_files.iter().for_each(&mut f);
        }
        if let Some(c) = self.containers.as_ref() {
            for q in c.quadlets.iter() {
                f(&q.file);
            }
        }
        if let Some(k) = self.kernel.as_ref() {
            k.modules_load.iter().for_each(&mut f);
            k.modprobe.iter().for_each(&mut f);
            k.dracut.iter().for_each(&mut f);
        }
        if let Some(s) = self.security.as_ref() {
            s.audit_rules.iter().for_each(&mut f);
            s.pam.iter().for_each(&mut f);
        }
        if let Some(u) = self.users.as_ref() {
            u.sudoers.iter().for_each(&mut f);
        }
    }

    /// Visit every captured file in the document, in a fixed traversal
    /// order. This is the redaction pass's access path; the order defines
    /// the order of secrets-review events.
    pub(crate) fn visit_files_mut(&mut self, mut f: impl FnMut(&mut CapturedFile)) {
        if let Some(p) = self.packages.as_mut() {
            p.repo_files.iter_mut().for_each(&mut f);
        }
        if let Some(c) = self.configs.as_mut() {
            for m in c.modified.iter_mut() {
                f(&mut m.file);
            }
            c.unowned.iter_mut().for_each(&mut f);
            for o in c.orphaned.iter_mut() {
                f(&mut o.file);
            }
        }
        if let Some(n) = self.network.as_mut() {
            for p in n.profiles.iter_mut() {
                f(&mut p.file);
            }
            for z in n.firewall.zones.iter_mut() {
                f(&mut z.file);
            }
            if let Some(d) = n.firewall.direct_rules.as_mut() {
                f(d);
            }
        }
        if let Some(s) = self.storage.as_mut() {
            s.automount_maps.iter_mut().for_each(&mut f);
        }
        if let Some(s) = self.scheduled.as_mut() {
            s.timer_files.iter_mut().for_each(&mut f);
        }
        if let Some(c) = self.containers.as_mut() {
            for q in c.quadlets.iter_mut() {
                f(&mut q.file);
            }
        }
        if let Some(k) = self.kernel.as_mut() {
            k.modules_load.iter_mut().for_each(&mut f);
            k.modprobe.iter_mut().for_each(&mut f);
            k.dracut.iter_mut().for_each(&mut f);
        }
        if let Some(s) = self.security.as_mut() {
            s.audit_rules.iter_mut().for_each(&mut f);
            s.pam.iter_mut().for_each(&mut f);
        }
        if let Some(u) = self.users.as_mut() {
            u.sudoers.iter_mut().for_each(&mut f);
        }
    }
}

/// Identity of the inspected host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    /// Host name.
    pub hostname: String,
    /// Distribution name (os-release `NAME`).
    pub distro: String,
    /// Distribution id (os-release `ID`).
    pub distro_id: String,
    /// Full version (os-release `VERSION_ID`), e.g. `9.4`.
    pub version_id: String,
    /// Major version component.
    pub major: u32,
    /// Machine architecture.
    pub arch: String,
    /// When the inspection ran.
    pub inspected_at: DateTime<Utc>,
}

/// How the target image reference was chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSource {
    /// Mapped automatically from the host identity.
    Auto,
    /// `--target-version` supplied.
    VersionOverride,
    /// `--target-image` supplied.
    ImageOverride,
}

/// The resolved target base image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetImage {
    /// Full image reference, e.g. `quay.io/centos-bootc/centos-bootc:stream9`.
    pub image: String,
    /// How the reference was chosen.
    pub source: TargetSource,
    /// Whether the target major version differs from the host's.
    pub cross_major: bool,
}

/// How the baseline was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BaselineMode {
    /// The target image was queried through the host container runtime.
    Queried,
    /// An externally supplied package list was loaded.
    Supplied,
    /// No baseline; every installed package is treated as operator-added.
    AllPackages,
}

/// The package and preset state of the target base image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Baseline {
    /// Package names present in the target image.
    pub packages: BTreeSet<String>,
    /// Unit names preset-enabled in the target image.
    pub preset_enabled: BTreeSet<String>,
    /// Unit names preset-disabled in the target image.
    pub preset_disabled: BTreeSet<String>,
    /// How this baseline was obtained.
    pub mode: BaselineMode,
}

/// A file captured from the host, possibly redacted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedFile {
    /// Path relative to the host root (no leading slash).
    pub path: Utf8PathBuf,
    /// File body after redaction; `None` when the path is excluded by
    /// policy or the file was unreadable.
    pub content: Option<String>,
    /// Whether any secret pattern was substituted in `content`.
    #[serde(default)]
    pub redacted: bool,
    /// Whether the whole file was suppressed by the path exclusion list.
    #[serde(default)]
    pub excluded: bool,
    /// Free-form provenance note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CapturedFile {
    /// Capture raw content for `path`. Redaction happens at seal time.
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            redacted: false,
            excluded: false,
            note: None,
        }
    }

    pub(crate) fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// An installed package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Package {
    /// Package name.
    pub name: String,
    /// Epoch, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Version.
    pub version: String,
    /// Release.
    pub release: String,
    /// Architecture.
    pub arch: String,
}

/// A package-manager verification result for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyEntry {
    /// Path relative to the host root.
    pub path: Utf8PathBuf,
    /// Raw verification flags, e.g. `S.5....T.`.
    pub flags: String,
    /// File attribute marker (`c` for config, `d` for doc, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

/// Installed packages and the delta against the baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackagesSection {
    /// Full inventory, sorted by name.
    pub installed: Vec<Package>,
    /// Names present on the host but absent from the baseline, sorted.
    pub added: Vec<String>,
    /// Names present in the baseline but absent from the host, sorted.
    pub removed: Vec<String>,
    /// Modified-file verification entries.
    pub verify: Vec<VerifyEntry>,
    /// Captured repository definition files.
    pub repo_files: Vec<CapturedFile>,
    /// Packages seen in the transaction history as installed then removed.
    pub install_history: Vec<String>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// Current administrative state of a unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// Unit is enabled.
    Enabled,
    /// Unit is disabled.
    Disabled,
    /// Unit is masked.
    Masked,
    /// Unit has no `[Install]` section.
    Static,
}

/// Preset default for a unit in the base image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PresetState {
    /// Preset-enabled in the base image.
    Enabled,
    /// Preset-disabled in the base image.
    Disabled,
}

/// The directive to emit for a unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceAction {
    /// No directive needed.
    None,
    /// `systemctl enable`.
    Enable,
    /// `systemctl disable`.
    Disable,
    /// `systemctl mask`.
    Mask,
}

/// One unit's state, baseline default, and emitted action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceUnit {
    /// Unit name, e.g. `httpd.service`.
    pub name: String,
    /// Current state on the host.
    pub state: ServiceState,
    /// Baseline preset default; `None` when the unit is absent from the
    /// baseline presets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetState>,
    /// The directive to emit.
    pub action: ServiceAction,
}

/// Unit state changes relative to the base image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicesSection {
    /// Per-unit records, sorted by name.
    pub units: Vec<ServiceUnit>,
    /// Set when the primary listing failed and the fallback scan ran.
    #[serde(default)]
    pub fallback_scan: bool,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// A package-owned file that fails verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifiedConfig {
    /// Verification flags from the package manager.
    pub flags: String,
    /// The captured file.
    pub file: CapturedFile,
    /// Unified diff against the package-shipped original, when diff mode
    /// is on and the original could be retrieved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A config file left behind by an uninstalled package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanedConfig {
    /// The package that used to own the footprint.
    pub package: String,
    /// The captured file.
    pub file: CapturedFile,
}

/// Captured configuration files in three classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigsSection {
    /// Package-owned files failing verification.
    pub modified: Vec<ModifiedConfig>,
    /// Files under the configuration root owned by no package.
    pub unowned: Vec<CapturedFile>,
    /// Files from install-then-removed packages.
    pub orphaned: Vec<OrphanedConfig>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// Classification of a connection profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileClass {
    /// Addressing is explicitly fixed; bake into the image.
    Static,
    /// Addressing is dynamic or unspecified; configure at deploy time.
    Dynamic,
}

/// A NetworkManager connection profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NmProfile {
    /// Profile id.
    pub name: String,
    /// Static or dynamic.
    pub class: ProfileClass,
    /// The captured keyfile.
    pub file: CapturedFile,
}

/// A firewalld zone document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallZone {
    /// Zone name.
    pub name: String,
    /// Services allowed in the zone.
    pub services: Vec<String>,
    /// Ports opened in the zone, `port/proto`.
    pub ports: Vec<String>,
    /// Rich rules, verbatim.
    pub rich_rules: Vec<String>,
    /// The captured zone file.
    pub file: CapturedFile,
}

/// Firewall state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallConfig {
    /// Zone documents under the operator zone directory.
    pub zones: Vec<FirewallZone>,
    /// The direct-rules document, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_rules: Option<CapturedFile>,
}

/// Who manages the resolver configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DnsProvenance {
    /// Managed by NetworkManager.
    NetworkManager,
    /// Managed by systemd-resolved.
    Resolved,
    /// A plain file with no management signature.
    HandEdited,
}

/// Network configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSection {
    /// Connection profiles.
    pub profiles: Vec<NmProfile>,
    /// Firewall state.
    pub firewall: FirewallConfig,
    /// Route table entries with default rules filtered out.
    pub routes: Vec<String>,
    /// Policy routing rules with default rules filtered out.
    pub route_rules: Vec<String>,
    /// Who manages the resolver configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsProvenance>,
    /// Nameservers listed in the resolver configuration.
    pub nameservers: Vec<String>,
    /// Lines appended to the hosts file beyond the stock entries.
    pub hosts_additions: Vec<String>,
    /// Proxy-related variables from the environment file.
    pub proxy: BTreeMap<String, String>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// Recommended migration strategy for a mount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MountStrategy {
    /// Content belongs in the image.
    Image,
    /// Machine-local scratch (swap, tmpfs); declare at deploy time.
    MachineLocal,
    /// Network or external storage; keep external.
    External,
    /// Mutable application state; needs a volume or migration plan.
    Volume,
    /// Pseudo-filesystem; nothing to do.
    Ignore,
}

/// One mount table entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountEntry {
    /// Device or source.
    pub source: String,
    /// Mount point.
    pub target: String,
    /// Filesystem type.
    pub fstype: String,
    /// Mount options, verbatim.
    pub options: String,
    /// Recommended strategy.
    pub strategy: MountStrategy,
}

/// A logical volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalVolume {
    /// Volume group name.
    pub vg: String,
    /// Logical volume name.
    pub name: String,
}

/// What to do with a mutable-state directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VarPlan {
    /// Small and static enough to seed in the image.
    Seed,
    /// Declare the directory via tmpfiles.d; content is runtime-owned.
    Tmpfiles,
    /// Significant data; needs a separate migration strategy.
    Migrate,
}

/// Approximate usage of one directory under the mutable state root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarUsage {
    /// Directory path relative to the host root.
    pub path: Utf8PathBuf,
    /// Approximate size in bytes.
    pub approx_bytes: u64,
    /// Recommendation.
    pub plan: VarPlan,
}

/// Mounts, volumes and mutable-state usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSection {
    /// Mount table entries with strategies.
    pub mounts: Vec<MountEntry>,
    /// Logical volume layout.
    pub logical_volumes: Vec<LogicalVolume>,
    /// Captured automount maps.
    pub automount_maps: Vec<CapturedFile>,
    /// Per-directory usage under the mutable state root.
    pub var_usage: Vec<VarUsage>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// A cron entry converted (or not) to a timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronEntry {
    /// File the entry came from, relative to the host root.
    pub source: Utf8PathBuf,
    /// The five-field schedule (or `@`-shorthand), verbatim.
    pub schedule: String,
    /// User the job runs as.
    pub user: String,
    /// Command line, verbatim.
    pub command: String,
    /// systemd calendar expression, when the schedule is convertible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_calendar: Option<String>,
    /// Generated unit base name, when convertible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
}

/// Where a timer unit lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TimerScope {
    /// Operator-installed under the system configuration root.
    Local,
    /// Shipped by a package.
    Vendor,
}

/// An existing timer unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerUnit {
    /// Timer unit name.
    pub name: String,
    /// Local or vendor.
    pub scope: TimerScope,
    /// `OnCalendar` expression, when parseable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_calendar: Option<String>,
    /// `ExecStart` of the paired service, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_start: Option<String>,
}

/// A pending at-job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AtJob {
    /// Spool file path relative to the host root.
    pub path: Utf8PathBuf,
    /// User the job runs as, when recoverable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Command extracted from the spool file, when recoverable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Cron entries, timer units, at jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledSection {
    /// Cron entries.
    pub cron: Vec<CronEntry>,
    /// Existing timer units.
    pub timers: Vec<TimerUnit>,
    /// Captured local timer/service unit files.
    pub timer_files: Vec<CapturedFile>,
    /// Pending at jobs.
    pub at_jobs: Vec<AtJob>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// A quadlet container unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuadletUnit {
    /// Unit file name.
    pub name: String,
    /// `Image=` reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// The captured unit file.
    pub file: CapturedFile,
}

/// A compose file and its per-service images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeFile {
    /// Path relative to the host root.
    pub path: Utf8PathBuf,
    /// Service name to image reference.
    pub services: BTreeMap<String, String>,
}

/// A live container enumerated through the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveContainer {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Runtime state.
    pub state: String,
}

/// Container workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainersSection {
    /// Quadlet units.
    pub quadlets: Vec<QuadletUnit>,
    /// Compose files.
    pub compose_files: Vec<ComposeFile>,
    /// Live enumeration, when requested.
    pub live: Vec<LiveContainer>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// How a non-package item got onto the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// pip-installed distribution.
    Pip,
    /// npm/yarn-managed tree.
    Npm,
    /// gem-managed tree.
    Gem,
    /// Checkout of a version-controlled repository.
    Git,
    /// Go-compiled binary.
    GoBinary,
    /// Rust-compiled binary.
    RustBinary,
    /// C/C++-compiled binary.
    CBinary,
    /// Could not be classified.
    Unknown,
}

/// Confidence in a provenance classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    /// Ecosystem metadata found.
    High,
    /// Strong structural signal.
    Medium,
    /// Weak signal only.
    Low,
    /// No signal.
    Unknown,
}

/// One discovered non-package installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonPackageItem {
    /// Path relative to the host root.
    pub path: Utf8PathBuf,
    /// Classification.
    pub provenance: Provenance,
    /// Classification confidence.
    pub confidence: Confidence,
    /// Version, when detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form detail (remote URL, lockfile path, linked mode, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Dynamic dependencies listed in the file header, not resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needed_libs: Vec<String>,
}

/// Software installed outside the package manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonPackageSection {
    /// Discovered items.
    pub items: Vec<NonPackageItem>,
    /// Whether the full-binary string scan ran.
    #[serde(default)]
    pub deep_scan: bool,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// A sysctl key diverging from the shipped default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SysctlDivergence {
    /// Key, dotted form.
    pub key: String,
    /// Configured value.
    pub value: String,
    /// Shipped default, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// File that sets the value, relative to the host root.
    pub source: Utf8PathBuf,
}

/// Kernel and boot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelSection {
    /// Boot command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
    /// Loaded modules that are neither dependencies nor configured to load.
    pub modules: Vec<String>,
    /// Divergent sysctl values with source attribution.
    pub sysctl: Vec<SysctlDivergence>,
    /// Captured modules-load.d files.
    pub modules_load: Vec<CapturedFile>,
    /// Captured modprobe.d files.
    pub modprobe: Vec<CapturedFile>,
    /// Captured dracut configuration.
    pub dracut: Vec<CapturedFile>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// A boolean set away from its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeBool {
    /// Boolean name.
    pub name: String,
    /// Configured value.
    pub value: bool,
}

/// SELinux state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecuritySection {
    /// Mode from the policy configuration (enforcing/permissive/disabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Policy type (targeted, mls, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
    /// Modules installed at the operator priority.
    pub custom_modules: Vec<String>,
    /// Booleans set away from their defaults.
    pub booleans: Vec<SeBool>,
    /// Captured audit rules.
    pub audit_rules: Vec<CapturedFile>,
    /// Captured PAM customizations.
    pub pam: Vec<CapturedFile>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// Non-system users and groups, captured as raw account-database lines.
///
/// Shadow entries are never captured; the rendered provisioning fragments
/// carry locked-password placeholders instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsersSection {
    /// passwd lines for non-system users.
    pub passwd: Vec<String>,
    /// group lines for non-system groups.
    pub group: Vec<String>,
    /// subuid lines for non-system users.
    pub subuid: Vec<String>,
    /// subgid lines for non-system users.
    pub subgid: Vec<String>,
    /// Paths of authorized_keys files (never their contents).
    pub authorized_key_paths: Vec<Utf8PathBuf>,
    /// Captured sudoers drop-ins.
    pub sudoers: Vec<CapturedFile>,
    /// Home directories of captured users.
    pub home_dirs: Vec<Utf8PathBuf>,
    /// Set when a query failed and the section is incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// Warning severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Needs manual intervention.
    Error,
    /// Handled, but the operator should review.
    Warn,
    /// Informational.
    Info,
}

/// A structured warning event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    /// Severity.
    pub severity: Severity,
    /// Name of the originating inspector.
    pub source: String,
    /// Affected resource, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Suggested action, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Whether the dashboard may dismiss this warning.
    #[serde(default)]
    pub dismissible: bool,
}

/// Where a redaction happened within a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "line")]
pub enum SecretLocation {
    /// A single substitution at this 1-based line.
    Line(usize),
    /// The whole file was suppressed by the path exclusion list.
    EntireFile,
}

/// One redaction event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretEvent {
    /// File path relative to the host root.
    pub path: Utf8PathBuf,
    /// Pattern class, e.g. `private-key`.
    pub class: String,
    /// Stable token substituted for the match; absent for whole-file
    /// exclusions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Where the redaction happened.
    pub location: SecretLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Snapshot {
        let mut s = Snapshot::new();
        s.host = Some(HostInfo {
            hostname: "web01".into(),
            distro: "CentOS Stream".into(),
            distro_id: "centos".into(),
            version_id: "9".into(),
            major: 9,
            arch: "x86_64".into(),
            inspected_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        });
        s.packages = Some(PackagesSection {
            added: vec!["httpd".into()],
            ..Default::default()
        });
        s.sealed = true;
        s
    }

    #[test]
    fn roundtrip() {
        let s = minimal();
        let buf = s.to_json().unwrap();
        let parsed: Snapshot = serde_json::from_str(&buf).unwrap();
        assert_eq!(s, parsed);
    }

    #[test]
    fn enum_wire_shape() {
        assert_eq!(
            serde_json::to_value(BaselineMode::AllPackages).unwrap(),
            serde_json::json!("all-packages")
        );
        assert_eq!(
            serde_json::to_value(Severity::Warn).unwrap(),
            serde_json::json!("warn")
        );
        assert_eq!(
            serde_json::to_value(SecretLocation::Line(3)).unwrap(),
            serde_json::json!({"kind": "line", "line": 3})
        );
        assert_eq!(
            serde_json::to_value(SecretLocation::EntireFile).unwrap(),
            serde_json::json!({"kind": "entire-file"})
        );
    }

    #[test]
    fn load_rejects_unsealed() {
        let mut s = minimal();
        s.sealed = false;
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("snap.json");
        std::fs::write(&p, s.to_json().unwrap()).unwrap();
        let p = Utf8PathBuf::try_from(p).unwrap();
        assert!(Snapshot::load(&p).is_err());
    }

    #[test]
    fn visit_files_order_is_stable() {
        let mut s = minimal();
        s.packages.as_mut().unwrap().repo_files =
            vec![CapturedFile::new("etc/yum.repos.d/custom.repo", "[custom]")];
        s.configs = Some(ConfigsSection {
            unowned: vec![CapturedFile::new("etc/app.conf", "x=1")],
            ..Default::default()
        });
        let mut seen = Vec::new();
        s.visit_files_mut(|f| seen.push(f.path.clone()));
        assert_eq!(
            seen,
            vec![
                Utf8PathBuf::from("etc/yum.repos.d/custom.repo"),
                Utf8PathBuf::from("etc/app.conf")
            ]
        );
    }
}
