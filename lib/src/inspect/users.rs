//! Non-system users and groups, captured as raw account-database lines
//! for append-based provisioning.
//!
//! Shadow files never pass through here; they are on the redaction
//! exclusion list and the rendered fragments carry locked placeholders.

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{InspectContext, Inspector};
use crate::snapshot::{Snapshot, UsersSection};

const NAME: &str = "users";

/// The id window for operator-created accounts.
const ID_MIN: u32 = 1000;
const ID_MAX: u32 = 60000;

/// Collects the users section.
#[derive(Debug)]
pub(crate) struct UserInspector;

fn id_in_window(field: Option<&str>) -> bool {
    field
        .and_then(|f| f.parse::<u32>().ok())
        .is_some_and(|id| (ID_MIN..ID_MAX).contains(&id))
}

/// Select passwd lines for non-system users (third field is the uid).
pub(crate) fn nonsystem_passwd(body: &str) -> Vec<String> {
    body.lines()
        .filter(|l| id_in_window(l.split(':').nth(2)))
        .map(|l| l.to_string())
        .collect()
}

/// Select group lines for non-system groups (third field is the gid).
pub(crate) fn nonsystem_group(body: &str) -> Vec<String> {
    body.lines()
        .filter(|l| id_in_window(l.split(':').nth(2)))
        .map(|l| l.to_string())
        .collect()
}

fn lines_for_users<'a>(body: &'a str, users: &[String]) -> Vec<String> {
    body.lines()
        .filter(|l| {
            l.split(':')
                .next()
                .is_some_and(|name| users.iter().any(|u| u == name))
        })
        .map(|l| l.to_string())
        .collect()
}

fn user_name(line: &str) -> Option<&str> {
    line.split(':').next().filter(|n| !n.is_empty())
}

fn home_dir(line: &str) -> Option<&str> {
    line.split(':').nth(5).filter(|h| h.starts_with('/'))
}

impl Inspector for UserInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = UsersSection::default();

        let Some(passwd) = ctx.read_optional("etc/passwd")? else {
            ctx.warnings.info(NAME, "No passwd database present");
            snapshot.users = Some(section);
            return Ok(());
        };
        section.passwd = nonsystem_passwd(&passwd);
        if let Some(group) = ctx.read_optional("etc/group")? {
            section.group = nonsystem_group(&group);
        }

        let names: Vec<String> = section
            .passwd
            .iter()
            .filter_map(|l| user_name(l).map(|n| n.to_string()))
            .collect();
        if let Some(subuid) = ctx.read_optional("etc/subuid")? {
            section.subuid = lines_for_users(&subuid, &names);
        }
        if let Some(subgid) = ctx.read_optional("etc/subgid")? {
            section.subgid = lines_for_users(&subgid, &names);
        }

        for line in &section.passwd {
            let Some(home) = home_dir(line) else { continue };
            let home_rel = Utf8PathBuf::from(home.trim_start_matches('/'));
            section.home_dirs.push(home_rel.clone());
            // Key paths only; key material never leaves the host.
            let keys = home_rel.join(".ssh/authorized_keys");
            if ctx.root.try_exists(&keys).unwrap_or(false) {
                section.authorized_key_paths.push(keys);
            }
        }

        for name in ctx.list_dir("etc/sudoers.d")? {
            if let Some(f) = ctx.capture(NAME, format!("etc/sudoers.d/{name}")) {
                section.sudoers.push(f);
            }
        }

        snapshot.users = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const PASSWD: &str = indoc! { "
        root:x:0:0:root:/root:/bin/bash
        bin:x:1:1:bin:/bin:/sbin/nologin
        alice:x:1000:1000:Alice:/home/alice:/bin/bash
        svcapp:x:988:984::/var/lib/svcapp:/sbin/nologin
        bob:x:1001:1001::/home/bob:/bin/zsh
        nobody:x:65534:65534::/:/sbin/nologin
    " };

    #[test]
    fn passwd_window() {
        let lines = nonsystem_passwd(PASSWD);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("alice:"));
        assert!(lines[1].starts_with("bob:"));
    }

    #[test]
    fn group_window() {
        let body = "root:x:0:\nwheel:x:10:alice\ndevs:x:1000:alice,bob\n";
        let lines = nonsystem_group(body);
        assert_eq!(lines, vec!["devs:x:1000:alice,bob"]);
    }

    #[test]
    fn captures_subids_and_key_paths() -> Result<()> {
        let td = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(td.path().join("etc"))?;
        std::fs::write(td.path().join("etc/passwd"), PASSWD)?;
        std::fs::write(td.path().join("etc/group"), "devs:x:1000:alice\n")?;
        std::fs::write(td.path().join("etc/subuid"), "alice:100000:65536\nsvc:165536:65536\n")?;
        std::fs::write(td.path().join("etc/subgid"), "alice:100000:65536\n")?;
        std::fs::create_dir_all(td.path().join("home/alice/.ssh"))?;
        std::fs::write(td.path().join("home/alice/.ssh/authorized_keys"), "ssh-ed25519 AAAA\n")?;
        let ctx = InspectContext::for_test(td.path());
        let mut snapshot = Snapshot::new();
        UserInspector.run(&ctx, &mut snapshot)?;
        let section = snapshot.users.unwrap();
        assert_eq!(section.subuid, vec!["alice:100000:65536"]);
        assert_eq!(section.subgid, vec!["alice:100000:65536"]);
        assert_eq!(
            section.authorized_key_paths,
            vec![Utf8PathBuf::from("home/alice/.ssh/authorized_keys")]
        );
        assert!(section.home_dirs.contains(&Utf8PathBuf::from("home/alice")));
        Ok(())
    }
}
