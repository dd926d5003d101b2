//! Generated file content: timer/service units converted from cron,
//! tmpfiles.d declarations, and account-database append fragments.

use std::collections::BTreeSet;

use crate::snapshot::{CronEntry, UsersSection, VarPlan, VarUsage};

/// A cron entry converted into a timer/service unit pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GeneratedTimer {
    /// Base name without suffix, unique within the run.
    pub(crate) base: String,
    pub(crate) timer_body: String,
    pub(crate) service_body: String,
}

/// Build unit pairs for every convertible cron entry, deduplicating base
/// names deterministically.
pub(crate) fn plan_timer_units(cron: &[CronEntry]) -> Vec<GeneratedTimer> {
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut ret = Vec::new();
    for entry in cron {
        let (Some(on_calendar), Some(base)) = (&entry.on_calendar, &entry.unit_name) else {
            continue;
        };
        let mut base = base.clone();
        let mut n = 2;
        while used.contains(&base) {
            base = format!("{}-{n}", entry.unit_name.as_deref().unwrap_or("cron-job"));
            n += 1;
        }
        used.insert(base.clone());
        let timer_body = format!(
            "[Unit]\n\
             Description=Converted cron job from /{}\n\
             \n\
             [Timer]\n\
             OnCalendar={on_calendar}\n\
             Persistent=true\n\
             \n\
             [Install]\n\
             WantedBy=timers.target\n",
            entry.source
        );
        let user = if entry.user == "root" {
            String::new()
        } else {
            format!("User={}\n", entry.user)
        };
        let service_body = format!(
            "[Unit]\n\
             Description=Converted cron job from /{}\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             {user}ExecStart={}\n",
            entry.source, entry.command
        );
        ret.push(GeneratedTimer {
            base,
            timer_body,
            service_body,
        });
    }
    ret
}

/// tmpfiles.d declarations for the mutable state root: every directory we
/// saw gets recreated on boot; content is runtime-owned.
pub(crate) fn tmpfiles_snippet(var_usage: &[VarUsage]) -> Option<String> {
    let mut lines: Vec<String> = var_usage
        .iter()
        .filter(|u| u.plan == VarPlan::Tmpfiles)
        .map(|u| format!("d /{} 0755 root root -", u.path))
        .collect();
    if lines.is_empty() {
        return None;
    }
    lines.sort();
    let mut out = String::from("# Directory structure expected under /var, recreated each boot\n");
    for l in lines {
        out.push_str(&l);
        out.push('\n');
    }
    Some(out)
}

/// Append fragments staged under `config/tmp/`. The shadow fragment
/// carries locked placeholders only; real credentials are a deploy-time
/// concern.
pub(crate) fn account_fragments(users: &UsersSection) -> Vec<(&'static str, String)> {
    let mut ret = Vec::new();
    let join = |lines: &[String]| {
        let mut s = lines.join("\n");
        if !s.is_empty() {
            s.push('\n');
        }
        s
    };
    if !users.passwd.is_empty() {
        ret.push(("passwd.append", join(&users.passwd)));
        let shadow: Vec<String> = users
            .passwd
            .iter()
            .filter_map(|l| l.split(':').next())
            .map(|name| format!("{name}:!!:19000:0:99999:7:::"))
            .collect();
        ret.push(("shadow.append", join(&shadow)));
    }
    if !users.group.is_empty() {
        ret.push(("group.append", join(&users.group)));
    }
    if !users.subuid.is_empty() {
        ret.push(("subuid.append", join(&users.subuid)));
    }
    if !users.subgid.is_empty() {
        ret.push(("subgid.append", join(&users.subgid)));
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn entry(cmd: &str) -> CronEntry {
        CronEntry {
            source: Utf8PathBuf::from("etc/crontab"),
            schedule: "0 3 * * *".into(),
            user: "root".into(),
            command: cmd.into(),
            on_calendar: Some("*-*-* 03:00:00".into()),
            unit_name: Some(crate::inspect::scheduled::unit_name_for(cmd)),
        }
    }

    #[test]
    fn timer_pair_for_nightly_backup() {
        let units = plan_timer_units(&[entry("/usr/local/bin/backup.sh")]);
        assert_eq!(units.len(), 1);
        let u = &units[0];
        assert_eq!(u.base, "cron-backup");
        assert!(u.timer_body.contains("OnCalendar=*-*-* 03:00:00"));
        assert!(u.service_body.contains("ExecStart=/usr/local/bin/backup.sh"));
        assert!(u.timer_body.contains("WantedBy=timers.target"));
    }

    #[test]
    fn base_names_deduplicate() {
        let units = plan_timer_units(&[entry("/a/backup.sh"), entry("/b/backup.sh")]);
        assert_eq!(units[0].base, "cron-backup");
        assert_eq!(units[1].base, "cron-backup-2");
    }

    #[test]
    fn nonroot_user_carried_into_service() {
        let mut e = entry("/usr/local/bin/sync.sh");
        e.user = "alice".into();
        let units = plan_timer_units(&[e]);
        assert!(units[0].service_body.contains("User=alice\n"));
    }

    #[test]
    fn shadow_fragment_is_locked() {
        let users = UsersSection {
            passwd: vec!["alice:x:1000:1000::/home/alice:/bin/bash".into()],
            ..Default::default()
        };
        let frags = account_fragments(&users);
        let shadow = frags.iter().find(|(n, _)| *n == "shadow.append").unwrap();
        assert_eq!(shadow.1, "alice:!!:19000:0:99999:7:::\n");
    }
}
