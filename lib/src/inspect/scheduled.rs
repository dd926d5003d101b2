//! Scheduled tasks: cron entries (with timer conversion), existing timer
//! units, and pending at jobs.

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{InspectContext, Inspector};
use crate::snapshot::{AtJob, CronEntry, ScheduledSection, Snapshot, TimerScope, TimerUnit};

const NAME: &str = "scheduled";

/// Collects the scheduled-task section.
#[derive(Debug)]
pub(crate) struct ScheduledInspector;

/// Convert a cron schedule to a systemd calendar expression.
///
/// Only conservative shapes convert: each field may be `*`, a plain
/// number, or a `*/step`. Anything else (lists, ranges, names) returns
/// `None` and surfaces as a manual-intervention item.
pub(crate) fn cron_to_oncalendar(schedule: &str) -> Option<String> {
    match schedule.trim() {
        "@hourly" => return Some("hourly".into()),
        "@daily" | "@midnight" => return Some("daily".into()),
        "@weekly" => return Some("weekly".into()),
        "@monthly" => return Some("monthly".into()),
        "@yearly" | "@annually" => return Some("yearly".into()),
        "@reboot" => return None,
        _ => {}
    }
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let [min, hour, dom, mon, dow] = fields.as_slice() else {
        return None;
    };
    let simple = |f: &str| f == "*" || f.chars().all(|c| c.is_ascii_digit());
    fn step(f: &str) -> Option<&str> {
        f.strip_prefix("*/")
            .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
    }
    let time = match (step(min), step(hour)) {
        (Some(m), None) if *hour == "*" => format!("*:0/{m}:00"),
        (None, Some(h)) if simple(min) => {
            format!("0/{h}:{}:00", pad(min))
        }
        (None, None) if simple(min) && simple(hour) => {
            format!("{}:{}:00", pad(hour), pad(min))
        }
        _ => return None,
    };
    if !(simple(dom) && simple(mon)) {
        return None;
    }
    let date = format!("*-{}-{}", unpadded(mon), unpadded(dom));
    let dowpart = match *dow {
        "*" => String::new(),
        d if simple(d) => {
            let n: usize = d.parse().ok()?;
            let name = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"].get(n)?;
            format!("{name} ")
        }
        _ => return None,
    };
    Some(format!("{dowpart}{date} {time}"))
}

fn pad(f: &str) -> String {
    if f == "*" {
        "*".into()
    } else {
        format!("{:02}", f.parse::<u32>().unwrap_or(0))
    }
}

fn unpadded(f: &str) -> String {
    if f == "*" {
        "*".into()
    } else {
        f.trim_start_matches('0').to_string()
    }
}

/// Derive a unit base name from a cron command line.
pub(crate) fn unit_name_for(command: &str) -> String {
    let first = command.split_whitespace().next().unwrap_or("job");
    let base = first.rsplit('/').next().unwrap_or(first);
    let base = base.split('.').next().unwrap_or(base);
    let clean: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let clean = clean.trim_matches('-');
    if clean.is_empty() {
        "cron-job".into()
    } else {
        format!("cron-{clean}")
    }
}

/// Parse one crontab body. `user_field` says whether the sixth column is
/// the user (system crontabs) or not (user spool files).
pub(crate) fn parse_crontab(
    source: &Utf8PathBuf,
    body: &str,
    user_field: bool,
    default_user: &str,
) -> Vec<CronEntry> {
    let mut ret = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Environment assignments like MAILTO=
        if !line.starts_with('@')
            && line
                .split_whitespace()
                .next()
                .is_some_and(|f| f.contains('='))
        {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (schedule, rest) = if line.starts_with('@') {
            if tokens.is_empty() {
                continue;
            }
            (tokens[0].to_string(), &tokens[1..])
        } else {
            if tokens.len() < 6 {
                continue;
            }
            (tokens[..5].join(" "), &tokens[5..])
        };
        let (user, command) = if user_field {
            match rest.split_first() {
                Some((user, cmd)) => (user.to_string(), cmd.join(" ")),
                None => (default_user.to_string(), String::new()),
            }
        } else {
            (default_user.to_string(), rest.join(" "))
        };
        if command.is_empty() {
            continue;
        }
        let on_calendar = cron_to_oncalendar(&schedule);
        let unit_name = on_calendar.as_ref().map(|_| unit_name_for(&command));
        ret.push(CronEntry {
            source: source.clone(),
            schedule,
            user,
            command,
            on_calendar,
            unit_name,
        });
    }
    ret
}

/// Extract `OnCalendar` from a timer body and `ExecStart` from its
/// paired service body.
fn parse_timer(timer_body: &str, service_body: Option<&str>) -> (Option<String>, Option<String>) {
    let find = |body: &str, key: &str| {
        body.lines()
            .filter_map(|l| l.trim().strip_prefix(key).map(|v| v.trim().to_string()))
            .next_back()
    };
    let on_calendar = find(timer_body, "OnCalendar=");
    let exec_start = service_body.and_then(|b| find(b, "ExecStart="));
    (on_calendar, exec_start)
}

fn parse_at_job(body: &str) -> (Option<String>, Option<String>) {
    let mut user = None;
    let mut command = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("LOGNAME=") {
            user = Some(v.trim_matches('"').to_string());
        }
        if !line.is_empty() && !line.starts_with('#') && !line.contains('=') {
            command = Some(line.to_string());
        }
    }
    (user, command)
}

impl Inspector for ScheduledInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = ScheduledSection::default();

        if let Some(body) = ctx.read_optional("etc/crontab")? {
            let src = Utf8PathBuf::from("etc/crontab");
            section.cron.extend(parse_crontab(&src, &body, true, "root"));
        }
        for name in ctx.list_dir("etc/cron.d")? {
            let src = Utf8PathBuf::from("etc/cron.d").join(&name);
            if let Some(body) = ctx.read_optional(&src)? {
                section.cron.extend(parse_crontab(&src, &body, true, "root"));
            }
        }
        for name in ctx.list_dir("var/spool/cron")? {
            let src = Utf8PathBuf::from("var/spool/cron").join(&name);
            if let Some(body) = ctx.read_optional(&src)? {
                section.cron.extend(parse_crontab(&src, &body, false, &name));
            }
        }
        // Periodic directories: each unowned script is an entry with an
        // `@` schedule. Package-shipped scripts ride along with their
        // packages and are skipped when ownership is known.
        let owned = ctx.rpm.owned_paths().ok();
        for (dir, tag) in [
            ("etc/cron.hourly", "@hourly"),
            ("etc/cron.daily", "@daily"),
            ("etc/cron.weekly", "@weekly"),
            ("etc/cron.monthly", "@monthly"),
        ] {
            for name in ctx.list_dir(dir)? {
                let rel = Utf8PathBuf::from(dir).join(&name);
                if owned.is_some_and(|o| o.contains(&rel)) {
                    continue;
                }
                section.cron.push(CronEntry {
                    source: rel.clone(),
                    schedule: tag.to_string(),
                    user: "root".into(),
                    command: format!("/{rel}"),
                    on_calendar: cron_to_oncalendar(tag),
                    unit_name: Some(unit_name_for(&name)),
                });
            }
        }

        for (dir, scope) in [
            ("etc/systemd/system", TimerScope::Local),
            ("usr/lib/systemd/system", TimerScope::Vendor),
        ] {
            for name in ctx.list_dir(dir)? {
                let Some(stem) = name.strip_suffix(".timer") else {
                    continue;
                };
                let Some(timer_body) = ctx.read_optional(format!("{dir}/{name}"))? else {
                    continue;
                };
                let service_body = ctx.read_optional(format!("{dir}/{stem}.service"))?;
                let (on_calendar, exec_start) = parse_timer(&timer_body, service_body.as_deref());
                section.timers.push(TimerUnit {
                    name: name.clone(),
                    scope,
                    on_calendar,
                    exec_start,
                });
                if scope == TimerScope::Local {
                    if let Some(f) = ctx.capture(NAME, format!("{dir}/{name}")) {
                        section.timer_files.push(f);
                    }
                    if service_body.is_some() {
                        if let Some(f) = ctx.capture(NAME, format!("{dir}/{stem}.service")) {
                            section.timer_files.push(f);
                        }
                    }
                }
            }
        }

        for name in ctx.list_dir("var/spool/at")? {
            if !name.starts_with('a') || name == ".SEQ" {
                continue;
            }
            let rel = Utf8PathBuf::from("var/spool/at").join(&name);
            let Some(body) = ctx.read_optional(&rel)? else { continue };
            let (user, command) = parse_at_job(&body);
            section.at_jobs.push(AtJob { path: rel, user, command });
        }
        if !section.at_jobs.is_empty() {
            ctx.warnings.warn(
                NAME,
                format!(
                    "{} pending at-job(s) cannot be carried into an image; review them manually",
                    section.at_jobs.len()
                ),
            );
        }

        snapshot.scheduled = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_conversion() {
        // The canonical nightly backup
        assert_eq!(cron_to_oncalendar("0 3 * * *").as_deref(), Some("*-*-* 03:00:00"));
        assert_eq!(cron_to_oncalendar("30 4 1 * *").as_deref(), Some("*-*-1 04:30:00"));
        assert_eq!(cron_to_oncalendar("15 2 * * 0").as_deref(), Some("Sun *-*-* 02:15:00"));
        assert_eq!(cron_to_oncalendar("*/15 * * * *").as_deref(), Some("*-*-* *:0/15:00"));
        assert_eq!(cron_to_oncalendar("@daily").as_deref(), Some("daily"));
        // Lists, ranges, and @reboot are not convertible
        assert_eq!(cron_to_oncalendar("0 3,15 * * *"), None);
        assert_eq!(cron_to_oncalendar("0 3 * * 1-5"), None);
        assert_eq!(cron_to_oncalendar("@reboot"), None);
    }

    #[test]
    fn crontab_with_user_field() {
        let src = Utf8PathBuf::from("etc/crontab");
        let body = "SHELL=/bin/bash\n# nightly\n0 3 * * * root /usr/local/bin/backup.sh\n";
        let entries = parse_crontab(&src, body, true, "root");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.schedule, "0 3 * * *");
        assert_eq!(e.user, "root");
        assert_eq!(e.command, "/usr/local/bin/backup.sh");
        assert_eq!(e.on_calendar.as_deref(), Some("*-*-* 03:00:00"));
        assert_eq!(e.unit_name.as_deref(), Some("cron-backup"));
    }

    #[test]
    fn user_spool_has_no_user_field() {
        let src = Utf8PathBuf::from("var/spool/cron/alice");
        let body = "5 * * * * /home/alice/sync.sh --quiet\n";
        let entries = parse_crontab(&src, body, false, "alice");
        assert_eq!(entries[0].user, "alice");
        assert_eq!(entries[0].command, "/home/alice/sync.sh --quiet");
    }

    #[test]
    fn at_shorthand() {
        let src = Utf8PathBuf::from("etc/cron.d/cleanup");
        let entries = parse_crontab(&src, "@weekly root /opt/cleanup.sh\n", true, "root");
        assert_eq!(entries[0].schedule, "@weekly");
        assert_eq!(entries[0].on_calendar.as_deref(), Some("weekly"));
    }

    #[test]
    fn timer_extraction() {
        let timer = "[Unit]\nDescription=x\n[Timer]\nOnCalendar=*-*-* 06:00:00\n[Install]\nWantedBy=timers.target\n";
        let service = "[Service]\nExecStart=/usr/local/bin/report.sh\n";
        let (cal, exec) = parse_timer(timer, Some(service));
        assert_eq!(cal.as_deref(), Some("*-*-* 06:00:00"));
        assert_eq!(exec.as_deref(), Some("/usr/local/bin/report.sh"));
    }

    #[test]
    fn unit_names() {
        assert_eq!(unit_name_for("/usr/local/bin/backup.sh --full"), "cron-backup");
        assert_eq!(unit_name_for("run_job"), "cron-run-job");
    }
}
