//! The deploy-time kickstart fragment: everything that belongs to the
//! machine, not the image.

use std::fmt::Write as _;

use crate::snapshot::{DnsProvenance, MountStrategy, ProfileClass, Snapshot};

pub(crate) fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Kickstart fragment suggested by reimage.\n\
         # This is a suggestion: review and adapt it for the target environment.\n"
    );

    if let Some(host) = snapshot.host.as_ref() {
        let _ = writeln!(out, "network --hostname={}", host.hostname);
    }

    if let Some(network) = snapshot.network.as_ref() {
        for p in network
            .profiles
            .iter()
            .filter(|p| p.class == ProfileClass::Dynamic)
        {
            let _ = writeln!(
                out,
                "# Profile '{}' used dynamic addressing on the source host\n\
                 network --bootproto=dhcp --device={} --activate",
                p.name, p.name
            );
        }
        if network.dns == Some(DnsProvenance::HandEdited) && !network.nameservers.is_empty() {
            let _ = writeln!(
                out,
                "# resolv.conf was hand-edited on the source host\n\
                 network --nameserver={}",
                network.nameservers.join(",")
            );
        }
    }

    if let Some(storage) = snapshot.storage.as_ref() {
        for m in storage
            .mounts
            .iter()
            .filter(|m| m.strategy == MountStrategy::External)
        {
            let _ = writeln!(
                out,
                "# External mount {} ({}); supply credentials/options at deploy time\n\
                 # mount {} {} -o {}",
                m.target, m.fstype, m.source, m.target, m.options
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_snapshot;
    use super::*;

    #[test]
    fn dhcp_and_nameservers_land_here() {
        let out = render(&sample_snapshot());
        assert!(out.contains("network --hostname=web01"));
        assert!(out.contains("--bootproto=dhcp --device=eth1"));
        assert!(out.contains("network --nameserver=192.0.2.53"));
    }
}
