//! Network configuration: connection profiles, firewall state, resolver
//! provenance, routes, hosts additions, proxy variables.

use anyhow::Result;
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{InspectContext, Inspector};
use crate::snapshot::{
    DnsProvenance, FirewallZone, NetworkSection, NmProfile, ProfileClass, Snapshot,
};

const NAME: &str = "network";

/// Collects the network section.
#[derive(Debug)]
pub(crate) struct NetworkInspector;

/// A profile is static only when its addressing method is explicitly
/// fixed; unspecified or dynamic methods mean deploy-time configuration.
pub(crate) fn classify_profile(keyfile: &str) -> ProfileClass {
    let ini = match tini::Ini::from_string(keyfile) {
        Ok(ini) => ini,
        Err(_) => return ProfileClass::Dynamic,
    };
    let v4: Option<String> = ini.get("ipv4", "method");
    let v6: Option<String> = ini.get("ipv6", "method");
    let fixed = |m: &Option<String>| {
        matches!(m.as_deref(), Some("manual") | Some("shared") | Some("link-local"))
    };
    if fixed(&v4) || fixed(&v6) {
        ProfileClass::Static
    } else {
        ProfileClass::Dynamic
    }
}

fn profile_name(keyfile: &str, filename: &str) -> String {
    tini::Ini::from_string(keyfile)
        .ok()
        .and_then(|ini| ini.get::<String>("connection", "id"))
        .unwrap_or_else(|| {
            filename
                .trim_end_matches(".nmconnection")
                .to_string()
        })
}

static ZONE_SERVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<service\s+name="([^"]+)""#).expect("static regex"));
static ZONE_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<port\s+port="([^"]+)"\s+protocol="([^"]+)""#).expect("static regex"));
static ZONE_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rule\b.*?</rule>").expect("static regex"));

/// Pull services, ports, and rich rules out of a zone document.
pub(crate) fn parse_zone(body: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    let services = ZONE_SERVICE
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect();
    let ports = ZONE_PORT
        .captures_iter(body)
        .map(|c| format!("{}/{}", &c[1], &c[2]))
        .collect();
    let rules = ZONE_RULE
        .find_iter(body)
        .map(|m| {
            m.as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    (services, ports, rules)
}

/// Resolver provenance: the symlink target wins; otherwise the header
/// signature; otherwise the file is hand-edited.
pub(crate) fn resolv_provenance(link_target: Option<&str>, body: Option<&str>) -> Option<DnsProvenance> {
    if let Some(target) = link_target {
        if target.contains("systemd/resolve") {
            return Some(DnsProvenance::Resolved);
        }
        if target.contains("NetworkManager") {
            return Some(DnsProvenance::NetworkManager);
        }
    }
    let body = body?;
    if body.contains("Generated by NetworkManager") {
        Some(DnsProvenance::NetworkManager)
    } else if body.contains("systemd-resolved") {
        Some(DnsProvenance::Resolved)
    } else {
        Some(DnsProvenance::HandEdited)
    }
}

fn parse_nameservers(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| l.trim().strip_prefix("nameserver"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Drop default routes and kernel-scope noise; what remains was put
/// there by an operator.
pub(crate) fn filter_routes(out: &str) -> Vec<String> {
    out.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("default"))
        .filter(|l| !l.contains("proto kernel"))
        .map(|l| l.to_string())
        .collect()
}

/// Drop the three rules every host has (priorities 0, 32766, 32767).
pub(crate) fn filter_route_rules(out: &str) -> Vec<String> {
    out.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| {
            !["0:", "32766:", "32767:"]
                .iter()
                .any(|p| l.starts_with(p))
        })
        .map(|l| l.to_string())
        .collect()
}

/// Lines in the hosts file beyond the stock localhost entries.
pub(crate) fn hosts_additions(body: &str) -> Vec<String> {
    body.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| {
            let addr = l.split_whitespace().next().unwrap_or_default();
            addr != "127.0.0.1" && addr != "::1" && addr != "127.0.1.1"
        })
        .map(|l| l.to_string())
        .collect()
}

const PROXY_VARS: &[&str] = &["http_proxy", "https_proxy", "ftp_proxy", "all_proxy", "no_proxy"];

impl Inspector for NetworkInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = NetworkSection::default();

        let conndir = "etc/NetworkManager/system-connections";
        for name in ctx.list_dir(conndir)? {
            if !name.ends_with(".nmconnection") {
                continue;
            }
            let Some(file) = ctx.capture(NAME, format!("{conndir}/{name}")) else {
                continue;
            };
            let body = file.content.as_deref().unwrap_or_default();
            section.profiles.push(NmProfile {
                name: profile_name(body, &name),
                class: classify_profile(body),
                file,
            });
        }

        for name in ctx.list_dir("etc/firewalld/zones")? {
            if !name.ends_with(".xml") {
                continue;
            }
            let Some(file) = ctx.capture(NAME, format!("etc/firewalld/zones/{name}")) else {
                continue;
            };
            let (services, ports, rich_rules) =
                parse_zone(file.content.as_deref().unwrap_or_default());
            section.firewall.zones.push(FirewallZone {
                name: name.trim_end_matches(".xml").to_string(),
                services,
                ports,
                rich_rules,
                file,
            });
        }
        section.firewall.direct_rules = ctx.capture(NAME, "etc/firewalld/direct.xml");

        let resolv = Utf8Path::new("etc/resolv.conf");
        let link_target = ctx
            .root
            .read_link_contents(resolv)
            .ok()
            .and_then(|p| p.to_str().map(|s| s.to_string()));
        let body = ctx.read_optional(resolv)?;
        section.dns = resolv_provenance(link_target.as_deref(), body.as_deref());
        if let Some(body) = body.as_deref() {
            section.nameservers = parse_nameservers(body);
        }
        match section.dns {
            Some(DnsProvenance::HandEdited) => {
                ctx.warnings.warn(
                    NAME,
                    "resolv.conf is hand-edited; bake nameservers into the deploy-time \
                     fragment rather than the image",
                );
            }
            None => ctx.warnings.info(NAME, "No resolv.conf present"),
            _ => {}
        }

        match ctx.live.routes.as_deref() {
            Some(out) => section.routes = filter_routes(out),
            None => ctx.warnings.info(
                NAME,
                "Route table not captured (host network namespace unavailable)",
            ),
        }
        if let Some(out) = ctx.live.route_rules.as_deref() {
            section.route_rules = filter_route_rules(out);
        }

        if let Some(hosts) = ctx.read_optional("etc/hosts")? {
            section.hosts_additions = hosts_additions(&hosts);
        }

        if let Some(env) = ctx.read_optional("etc/environment")? {
            for line in env.lines() {
                let line = line.trim();
                let Some((k, v)) = line.split_once('=') else { continue };
                let key = k.trim().to_ascii_lowercase();
                if PROXY_VARS.contains(&key.as_str()) {
                    section
                        .proxy
                        .insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
                }
            }
        }

        snapshot.network = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn profile_classification() {
        let static_profile = indoc! { "
            [connection]
            id=eth0-static
            type=ethernet

            [ipv4]
            method=manual
            address1=192.0.2.10/24,192.0.2.1
        " };
        let dhcp_profile = indoc! { "
            [connection]
            id=eth1
            type=ethernet

            [ipv4]
            method=auto
        " };
        assert_eq!(classify_profile(static_profile), ProfileClass::Static);
        assert_eq!(classify_profile(dhcp_profile), ProfileClass::Dynamic);
        // No method at all is dynamic
        assert_eq!(classify_profile("[connection]\nid=x\n"), ProfileClass::Dynamic);
        assert_eq!(profile_name(static_profile, "eth0.nmconnection"), "eth0-static");
        assert_eq!(profile_name("", "eth2.nmconnection"), "eth2");
    }

    #[test]
    fn zone_parsing() {
        let zone = indoc! { r#"
            <?xml version="1.0" encoding="utf-8"?>
            <zone>
              <short>Public</short>
              <service name="ssh"/>
              <service name="https"/>
              <port port="8443" protocol="tcp"/>
              <rule family="ipv4">
                <source address="192.0.2.0/24"/>
                <accept/>
              </rule>
            </zone>
        "# };
        let (services, ports, rules) = parse_zone(zone);
        assert_eq!(services, vec!["ssh", "https"]);
        assert_eq!(ports, vec!["8443/tcp"]);
        assert_eq!(rules.len(), 1);
        assert!(rules[0].contains("192.0.2.0/24"));
    }

    #[test]
    fn resolv_provenance_cases() {
        assert_eq!(
            resolv_provenance(Some("../run/systemd/resolve/stub-resolv.conf"), None),
            Some(DnsProvenance::Resolved)
        );
        assert_eq!(
            resolv_provenance(None, Some("# Generated by NetworkManager\nnameserver 192.0.2.1\n")),
            Some(DnsProvenance::NetworkManager)
        );
        // A plain file with no header signature is hand-edited
        assert_eq!(
            resolv_provenance(None, Some("nameserver 192.0.2.53\n")),
            Some(DnsProvenance::HandEdited)
        );
        assert_eq!(resolv_provenance(None, None), None);
    }

    #[test]
    fn hand_edited_resolv_warns() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(td.path().join("etc"))?;
        std::fs::write(td.path().join("etc/resolv.conf"), "nameserver 192.0.2.53\n")?;
        let ctx = InspectContext::for_test(td.path());
        let mut snapshot = Snapshot::new();
        NetworkInspector.run(&ctx, &mut snapshot)?;
        let section = snapshot.network.unwrap();
        assert_eq!(section.dns, Some(DnsProvenance::HandEdited));
        assert_eq!(section.nameservers, vec!["192.0.2.53"]);
        let warnings = ctx.warnings.seal();
        assert!(warnings.iter().any(|w| w.message.contains("hand-edited")));
        Ok(())
    }

    #[test]
    fn route_filtering() {
        let out = indoc! { "
            default via 192.0.2.1 dev eth0 proto dhcp metric 100
            192.0.2.0/24 dev eth0 proto kernel scope link src 192.0.2.10
            198.51.100.0/24 via 192.0.2.254 dev eth0 proto static
        " };
        let routes = filter_routes(out);
        assert_eq!(routes, vec!["198.51.100.0/24 via 192.0.2.254 dev eth0 proto static"]);
        let rules = filter_route_rules("0:\tfrom all lookup local\n100:\tfrom 192.0.2.10 lookup 50\n32766:\tfrom all lookup main\n");
        assert_eq!(rules, vec!["100:\tfrom 192.0.2.10 lookup 50"]);
    }

    #[test]
    fn hosts_file_additions() {
        let body = indoc! { "
            127.0.0.1   localhost localhost.localdomain
            ::1         localhost localhost.localdomain
            # comment
            192.0.2.40  db.internal db
        " };
        assert_eq!(hosts_additions(body), vec!["192.0.2.40  db.internal db"]);
    }
}
