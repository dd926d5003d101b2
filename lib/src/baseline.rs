//! Resolve the target base image and its package/preset baseline.
//!
//! Resolution precedence: `--target-image` > `--target-version` mapped
//! through the distribution table > automatic mapping from the host
//! identity, with per-distribution minimum-version clamps. The baseline
//! itself is queried from the target image through the privilege bridge,
//! loaded from an externally supplied file, or left empty ("all-packages
//! mode").

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::Utf8Path;

use crate::hostexec::HostBridge;
use crate::snapshot::{Baseline, BaselineMode, HostInfo, Severity, TargetImage, TargetSource, Warning};
use crate::warnings::WarningSink;

const SOURCE: &str = "baseline";

/// First bootc-capable RHEL 9 release; earlier host versions clamp up.
const RHEL9_MINIMUM: (u32, u32) = (9, 6);

/// The target image plus the baseline derived from it.
#[derive(Debug)]
pub(crate) struct ResolvedBaseline {
    pub(crate) target: Option<TargetImage>,
    pub(crate) baseline: Baseline,
}

/// Map a host identity (plus optional version override) to a base image
/// reference. Returns `None` for distributions outside the mapping table.
pub(crate) fn map_target_image(
    distro_id: &str,
    major: u32,
    version_id: &str,
    version_override: Option<&str>,
) -> Option<String> {
    let version = version_override.unwrap_or(version_id);
    match distro_id {
        "rhel" => {
            let (vmaj, vmin) = parse_version(version)?;
            let (vmaj, vmin) = if (vmaj, vmin) < RHEL9_MINIMUM && vmaj == 9 {
                RHEL9_MINIMUM
            } else {
                (vmaj, vmin)
            };
            Some(format!("registry.redhat.io/rhel{vmaj}/rhel-bootc:{vmaj}.{vmin}"))
        }
        "centos" => {
            let stream = version_override
                .and_then(|v| parse_version(v).map(|(m, _)| m))
                .unwrap_or(major);
            Some(format!("quay.io/centos-bootc/centos-bootc:stream{stream}"))
        }
        "fedora" => {
            let release = version_override.unwrap_or(version_id);
            let release = release.split('.').next().unwrap_or(release);
            Some(format!("quay.io/fedora/fedora-bootc:{release}"))
        }
        _ => None,
    }
}

fn parse_version(v: &str) -> Option<(u32, u32)> {
    let mut it = v.split('.');
    let major = it.next()?.parse().ok()?;
    let minor = it.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

fn target_major(image: &str) -> Option<u32> {
    // The tag is the most reliable place to recover a major version from:
    // rhel-bootc:9.6, centos-bootc:stream9, fedora-bootc:41.
    let tag = image.rsplit(':').next()?;
    let digits: String = tag
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Resolve the target image reference for this host.
pub(crate) fn resolve_target(
    host: &HostInfo,
    target_version: Option<&str>,
    target_image: Option<&str>,
    warnings: &WarningSink,
) -> Option<TargetImage> {
    let (image, source) = if let Some(image) = target_image {
        (image.to_string(), TargetSource::ImageOverride)
    } else {
        let source = if target_version.is_some() {
            TargetSource::VersionOverride
        } else {
            TargetSource::Auto
        };
        match map_target_image(&host.distro_id, host.major, &host.version_id, target_version) {
            Some(image) => (image, source),
            None => {
                warnings.push(Warning {
                    severity: Severity::Error,
                    source: SOURCE.into(),
                    resource: Some(host.distro_id.clone()),
                    message: format!(
                        "No base image mapping for distribution '{}'; pass --target-image",
                        host.distro_id
                    ),
                    suggestion: Some("supply --target-image explicitly".into()),
                    dismissible: false,
                });
                return None;
            }
        }
    };
    let cross_major = target_major(&image).is_some_and(|m| m != host.major);
    if cross_major {
        warnings.push(Warning {
            severity: Severity::Warn,
            source: SOURCE.into(),
            resource: Some(image.clone()),
            message: format!(
                "Cross-major migration: host is {} {} but the target image is {image}; \
                 package names, services, and config formats may differ",
                host.distro, host.version_id
            ),
            suggestion: Some("review the package and service diffs carefully".into()),
            dismissible: true,
        });
    }
    Some(TargetImage {
        image,
        source,
        cross_major,
    })
}

/// Resolve the package/preset baseline for the already-resolved target.
pub(crate) async fn resolve_baseline(
    bridge: &HostBridge,
    host: &HostInfo,
    target_version: Option<&str>,
    target_image: Option<&str>,
    fallback_packages: Option<&Utf8Path>,
    warnings: &WarningSink,
) -> Result<ResolvedBaseline> {
    let target = resolve_target(host, target_version, target_image, warnings);

    if let Some(path) = fallback_packages {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("Reading baseline package list {path}"))?;
        let packages = parse_package_list(&buf);
        warnings.info(
            SOURCE,
            format!("Using supplied baseline package list ({} packages)", packages.len()),
        );
        return Ok(ResolvedBaseline {
            target,
            baseline: Baseline {
                packages,
                preset_enabled: BTreeSet::new(),
                preset_disabled: BTreeSet::new(),
                mode: BaselineMode::Supplied,
            },
        });
    }

    if let Some(target) = target.as_ref().filter(|_| bridge.available()) {
        match query_image_baseline(bridge, &target.image).await {
            Ok(baseline) => {
                return Ok(ResolvedBaseline {
                    target: Some(target.clone()),
                    baseline,
                })
            }
            Err(e) => {
                warnings.warn(
                    SOURCE,
                    format!("Querying base image {} failed: {e:#}", target.image),
                );
            }
        }
    }

    warnings.push(Warning {
        severity: Severity::Warn,
        source: SOURCE.into(),
        resource: None,
        message: "No baseline available; falling back to all-packages mode. \
                  Every installed package will be treated as operator-added."
            .into(),
        suggestion: Some(
            "re-run with host podman reachable, or supply --baseline-packages".into(),
        ),
        dismissible: false,
    });
    Ok(ResolvedBaseline {
        target,
        baseline: Baseline {
            packages: BTreeSet::new(),
            preset_enabled: BTreeSet::new(),
            preset_disabled: BTreeSet::new(),
            mode: BaselineMode::AllPackages,
        },
    })
}

/// Run the target image through the host's container runtime and read
/// out its package list and systemd preset policy.
async fn query_image_baseline(bridge: &HostBridge, image: &str) -> Result<Baseline> {
    let pkgout = bridge
        .read_in_host_namespaces(&[
            "podman",
            "run",
            "--rm",
            image,
            "rpm",
            "-qa",
            "--queryformat",
            "%{NAME}\\n",
        ])
        .await
        .context("Listing base image packages")?;
    let packages = parse_package_list(&pkgout);
    if packages.is_empty() {
        anyhow::bail!("Base image returned an empty package list");
    }
    let presetout = bridge
        .read_in_host_namespaces(&[
            "podman",
            "run",
            "--rm",
            image,
            "sh",
            "-c",
            "cat /usr/lib/systemd/system-preset/*.preset /etc/systemd/system-preset/*.preset 2>/dev/null || true",
        ])
        .await
        .context("Reading base image presets")?;
    let (preset_enabled, preset_disabled) = parse_presets(&presetout);
    Ok(Baseline {
        packages,
        preset_enabled,
        preset_disabled,
        mode: BaselineMode::Queried,
    })
}

fn parse_package_list(buf: &str) -> BTreeSet<String> {
    buf.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}

/// Parse systemd preset files. Glob rules (including the conventional
/// trailing `disable *`) are ignored: the service action table only
/// distinguishes exact-name presets from absence, and glob rules do not
/// change any emitted action.
fn parse_presets(buf: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut enabled = BTreeSet::new();
    let mut disabled = BTreeSet::new();
    for line in buf.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((verb, unit)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let unit = unit.trim();
        if unit.contains('*') {
            continue;
        }
        match verb {
            "enable" => {
                enabled.insert(unit.to_string());
            }
            "disable" => {
                disabled.insert(unit.to_string());
            }
            _ => {}
        }
    }
    (enabled, disabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn host(distro_id: &str, version_id: &str, major: u32) -> HostInfo {
        HostInfo {
            hostname: "h".into(),
            distro: distro_id.into(),
            distro_id: distro_id.into(),
            version_id: version_id.into(),
            major,
            arch: "x86_64".into(),
            inspected_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn mapping_table() {
        // RHEL 9.4 clamps up to the first bootc release
        assert_eq!(
            map_target_image("rhel", 9, "9.4", None).unwrap(),
            "registry.redhat.io/rhel9/rhel-bootc:9.6"
        );
        assert_eq!(
            map_target_image("rhel", 9, "9.8", None).unwrap(),
            "registry.redhat.io/rhel9/rhel-bootc:9.8"
        );
        assert_eq!(
            map_target_image("rhel", 10, "10.1", None).unwrap(),
            "registry.redhat.io/rhel10/rhel-bootc:10.1"
        );
        assert_eq!(
            map_target_image("centos", 9, "9", None).unwrap(),
            "quay.io/centos-bootc/centos-bootc:stream9"
        );
        assert_eq!(
            map_target_image("fedora", 41, "41", None).unwrap(),
            "quay.io/fedora/fedora-bootc:41"
        );
        assert_eq!(map_target_image("debian", 12, "12", None), None);
    }

    #[test]
    fn version_override_wins() {
        assert_eq!(
            map_target_image("rhel", 9, "9.4", Some("9.8")).unwrap(),
            "registry.redhat.io/rhel9/rhel-bootc:9.8"
        );
    }

    #[test]
    fn cross_major_flagged() {
        let warnings = WarningSink::new();
        let t = resolve_target(
            &host("centos", "9", 9),
            None,
            Some("quay.io/centos-bootc/centos-bootc:stream10"),
            &warnings,
        )
        .unwrap();
        assert!(t.cross_major);
        assert_eq!(t.source, TargetSource::ImageOverride);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn presets() {
        let buf = "# comment\nenable chronyd.service\ndisable kdump.service\ndisable *\n";
        let (en, dis) = parse_presets(buf);
        assert!(en.contains("chronyd.service"));
        assert!(dis.contains("kdump.service"));
        assert_eq!(dis.len(), 1);
    }

    #[tokio::test]
    async fn all_packages_fallback() {
        // No runtime, no fallback file: all-packages mode plus a prominent
        // warning sourced from the baseline resolver.
        let warnings = WarningSink::new();
        let bridge = HostBridge::disconnected();
        let resolved = resolve_baseline(&bridge, &host("centos", "9", 9), None, None, None, &warnings)
            .await
            .unwrap();
        assert_eq!(resolved.baseline.mode, BaselineMode::AllPackages);
        assert!(resolved.baseline.packages.is_empty());
        let warnings = warnings.seal();
        assert!(warnings
            .iter()
            .any(|w| w.severity == Severity::Warn && w.source == "baseline"));
    }

    #[test]
    fn supplied_list_parsing() {
        let set = parse_package_list("httpd\n\n# comment\nvim-enhanced\n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("httpd"));
    }
}
