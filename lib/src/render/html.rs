//! The self-contained HTML dashboard. Styles and scripts are inlined;
//! the single file can be mailed or archived on its own.

use std::fmt::Write as _;

use crate::snapshot::{Severity, Snapshot};

use super::triage;

/// Minimal HTML escaping for text interpolated into the document.
pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; background: #f4f5f7; color: #1c1e21; }
header { background: #1c2733; color: #fff; padding: 1rem 2rem; }
header .meta { color: #9fb3c8; font-size: 0.9rem; }
main { padding: 1rem 2rem; max-width: 1100px; margin: 0 auto; }
.triage { display: flex; gap: 1rem; margin: 0.6rem 0 0 0; }
.triage span { padding: 0.2rem 0.7rem; border-radius: 1rem; font-size: 0.85rem; }
.t-auto { background: #1b7f4d; } .t-fixme { background: #b7791f; } .t-manual { background: #b52a2a; }
.warnings { background: #fff; border: 1px solid #d9dce1; border-radius: 6px; padding: 0.8rem 1rem; margin: 1rem 0; }
.warning { display: flex; gap: 0.6rem; align-items: baseline; padding: 0.35rem 0; border-bottom: 1px solid #eef0f3; }
.warning:last-child { border-bottom: none; }
.sev { font-size: 0.75rem; padding: 0.05rem 0.5rem; border-radius: 0.8rem; color: #fff; text-transform: uppercase; }
.sev-error { background: #b52a2a; } .sev-warn { background: #b7791f; } .sev-info { background: #2b6cb0; }
.warning button { margin-left: auto; border: none; background: #eef0f3; border-radius: 4px; cursor: pointer; }
.cards { display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 0.8rem; margin: 1rem 0; }
.card { background: #fff; border: 1px solid #d9dce1; border-radius: 6px; padding: 0.8rem 1rem; }
.card .count { font-size: 1.6rem; font-weight: 600; }
.ok { border-left: 4px solid #1b7f4d; } .attn { border-left: 4px solid #b7791f; } .bad { border-left: 4px solid #b52a2a; }
details { background: #fff; border: 1px solid #d9dce1; border-radius: 6px; margin: 0.5rem 0; padding: 0.4rem 1rem; }
summary { cursor: pointer; font-weight: 600; padding: 0.3rem 0; }
table { border-collapse: collapse; width: 100%; margin: 0.5rem 0 0.8rem 0; font-size: 0.9rem; }
th, td { text-align: left; padding: 0.3rem 0.6rem; border-bottom: 1px solid #eef0f3; }
code { background: #eef0f3; padding: 0 0.25rem; border-radius: 3px; }
.dismissed { opacity: 0.35; }
"#;

const SCRIPT: &str = r#"
function refreshWarningCount() {
  var active = document.querySelectorAll('.warning:not(.dismissed)').length;
  document.getElementById('warning-count').textContent = active;
}
function dismissWarning(btn) {
  btn.closest('.warning').classList.add('dismissed');
  refreshWarningCount();
}
function dismissAll() {
  document.querySelectorAll('.warning .dismiss').forEach(function (b) {
    b.closest('.warning').classList.add('dismissed');
  });
  refreshWarningCount();
}
"#;

fn card(out: &mut String, title: &str, count: usize, attention: bool, bad: bool) {
    let class = if bad {
        "card bad"
    } else if attention {
        "card attn"
    } else {
        "card ok"
    };
    let _ = writeln!(
        out,
        r#"<div class="{class}"><div class="count">{count}</div><div>{}</div></div>"#,
        escape(title)
    );
}

fn table<W: std::fmt::Write>(out: &mut W, headers: &[&str], rows: &[Vec<String>]) {
    let _ = write!(out, "<table><tr>");
    for h in headers {
        let _ = write!(out, "<th>{}</th>", escape(h));
    }
    let _ = writeln!(out, "</tr>");
    for row in rows {
        let _ = write!(out, "<tr>");
        for cell in row {
            let _ = write!(out, "<td>{}</td>", escape(cell));
        }
        let _ = writeln!(out, "</tr>");
    }
    let _ = writeln!(out, "</table>");
}

pub(crate) fn render(snapshot: &Snapshot) -> String {
    let t = triage(snapshot);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Inspection report</title>\n<style>{STYLE}</style>\n</head>\n<body>"
    );

    // Status banner
    let _ = writeln!(out, "<header>");
    if let Some(host) = snapshot.host.as_ref() {
        let _ = writeln!(
            out,
            "<h1>{}</h1><div class=\"meta\">{} {} ({}) | inspected {} | <span id=\"warning-count\">{}</span> active warning(s)</div>",
            escape(&host.hostname),
            escape(&host.distro),
            escape(&host.version_id),
            escape(&host.arch),
            escape(&host.inspected_at.to_rfc3339()),
            snapshot.warnings.len()
        );
    } else {
        let _ = writeln!(
            out,
            "<h1>Inspection report</h1><div class=\"meta\"><span id=\"warning-count\">{}</span> active warning(s)</div>",
            snapshot.warnings.len()
        );
    }
    let _ = writeln!(
        out,
        "<div class=\"triage\"><span class=\"t-auto\">{} automatic</span>\
         <span class=\"t-fixme\">{} FIXME</span>\
         <span class=\"t-manual\">{} manual</span></div>",
        t.automatic, t.fixme, t.manual
    );
    let _ = writeln!(out, "</header>\n<main>");

    // Warning panel
    if !snapshot.warnings.is_empty() {
        let _ = writeln!(
            out,
            "<div class=\"warnings\"><button onclick=\"dismissAll()\">Dismiss all</button>"
        );
        for w in &snapshot.warnings {
            let sev = match w.severity {
                Severity::Error => "error",
                Severity::Warn => "warn",
                Severity::Info => "info",
            };
            let dismiss = if w.dismissible {
                "<button class=\"dismiss\" onclick=\"dismissWarning(this)\">dismiss</button>"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "<div class=\"warning\"><span class=\"sev sev-{sev}\">{sev}</span>\
                 <strong>{}</strong> {}{}</div>",
                escape(&w.source),
                escape(&w.message),
                dismiss
            );
        }
        let _ = writeln!(out, "</div>");
    }

    // Category cards
    let _ = writeln!(out, "<div class=\"cards\">");
    if let Some(p) = snapshot.packages.as_ref() {
        card(&mut out, "Packages added", p.added.len(), false, false);
    }
    if let Some(s) = snapshot.services.as_ref() {
        card(&mut out, "Service changes", s.units.len(), false, false);
    }
    if let Some(c) = snapshot.configs.as_ref() {
        card(
            &mut out,
            "Config files",
            c.modified.len() + c.unowned.len(),
            !c.orphaned.is_empty(),
            false,
        );
    }
    if let Some(n) = snapshot.network.as_ref() {
        card(&mut out, "Network profiles", n.profiles.len(), false, false);
    }
    if let Some(s) = snapshot.scheduled.as_ref() {
        card(
            &mut out,
            "Scheduled tasks",
            s.cron.len() + s.timers.len(),
            s.cron.iter().any(|c| c.on_calendar.is_none()),
            !s.at_jobs.is_empty(),
        );
    }
    if let Some(c) = snapshot.containers.as_ref() {
        card(
            &mut out,
            "Container workloads",
            c.quadlets.len() + c.compose_files.len(),
            !c.compose_files.is_empty(),
            false,
        );
    }
    if let Some(n) = snapshot.non_package.as_ref() {
        let unknown = n
            .items
            .iter()
            .filter(|i| i.provenance == crate::snapshot::Provenance::Unknown)
            .count();
        card(&mut out, "Non-package software", n.items.len(), unknown > 0, false);
    }
    if let Some(s) = snapshot.security.as_ref() {
        card(
            &mut out,
            "SELinux customizations",
            s.custom_modules.len() + s.booleans.len(),
            false,
            !s.custom_modules.is_empty(),
        );
    }
    if let Some(u) = snapshot.users.as_ref() {
        card(&mut out, "Users and groups", u.passwd.len() + u.group.len(), false, false);
    }
    card(&mut out, "Secrets redacted", snapshot.secrets_review.len(), false, false);
    let _ = writeln!(out, "</div>");

    // Drill-downs
    if let Some(p) = snapshot.packages.as_ref() {
        let _ = writeln!(out, "<details><summary>Packages</summary>");
        let rows: Vec<Vec<String>> = p
            .added
            .iter()
            .map(|n| vec![n.clone(), "added".into()])
            .chain(p.removed.iter().map(|n| vec![n.clone(), "removed".into()]))
            .collect();
        table(&mut out, &["Package", "Change"], &rows);
        let _ = writeln!(out, "</details>");
    }
    if let Some(s) = snapshot.services.as_ref() {
        let _ = writeln!(out, "<details><summary>Services</summary>");
        let rows: Vec<Vec<String>> = s
            .units
            .iter()
            .map(|u| {
                vec![
                    u.name.clone(),
                    format!("{:?}", u.state),
                    u.preset.map(|p| format!("{p:?}")).unwrap_or_else(|| "absent".into()),
                    format!("{:?}", u.action),
                ]
            })
            .collect();
        table(&mut out, &["Unit", "State", "Base default", "Action"], &rows);
        let _ = writeln!(out, "</details>");
    }
    if let Some(c) = snapshot.configs.as_ref() {
        let _ = writeln!(out, "<details><summary>Configuration files</summary>");
        let rows: Vec<Vec<String>> = c
            .modified
            .iter()
            .map(|m| vec![format!("/{}", m.file.path), format!("modified ({})", m.flags)])
            .chain(c.unowned.iter().map(|f| vec![format!("/{}", f.path), "unowned".into()]))
            .chain(
                c.orphaned
                    .iter()
                    .map(|o| vec![format!("/{}", o.file.path), format!("orphaned ({})", o.package)]),
            )
            .collect();
        table(&mut out, &["File", "Class"], &rows);
        for m in c.modified.iter().filter(|m| m.diff.is_some()) {
            let _ = writeln!(
                out,
                "<details><summary>diff /{}</summary><pre>{}</pre></details>",
                escape(m.file.path.as_str()),
                escape(m.diff.as_deref().unwrap_or_default())
            );
        }
        let _ = writeln!(out, "</details>");
    }
    if let Some(n) = snapshot.network.as_ref() {
        let _ = writeln!(out, "<details><summary>Network</summary>");
        let rows: Vec<Vec<String>> = n
            .profiles
            .iter()
            .map(|p| {
                vec![
                    p.name.clone(),
                    match p.class {
                        crate::snapshot::ProfileClass::Static => "Bake into image".into(),
                        crate::snapshot::ProfileClass::Dynamic => "Kickstart at deploy".into(),
                    },
                ]
            })
            .collect();
        table(&mut out, &["Profile", "Deployment"], &rows);
        if let Some(dns) = n.dns {
            let _ = writeln!(out, "<p>Resolver: <code>{:?}</code></p>", dns);
        }
        let _ = writeln!(out, "</details>");
    }
    if let Some(n) = snapshot.non_package.as_ref() {
        let _ = writeln!(out, "<details><summary>Non-package software</summary>");
        let rows: Vec<Vec<String>> = n
            .items
            .iter()
            .map(|i| {
                vec![
                    format!("/{}", i.path),
                    format!("{:?}", i.provenance),
                    format!("{:?}", i.confidence),
                    i.detail.clone().unwrap_or_default(),
                ]
            })
            .collect();
        table(&mut out, &["Path", "Provenance", "Confidence", "Detail"], &rows);
        let _ = writeln!(out, "</details>");
    }
    if !snapshot.secrets_review.is_empty() {
        let _ = writeln!(out, "<details><summary>Secrets</summary>");
        let rows: Vec<Vec<String>> = snapshot
            .secrets_review
            .iter()
            .map(|e| {
                vec![
                    format!("/{}", e.path),
                    e.class.clone(),
                    e.token.clone().unwrap_or_else(|| "entire file".into()),
                ]
            })
            .collect();
        table(&mut out, &["File", "Pattern", "Token"], &rows);
        let _ = writeln!(out, "</details>");
    }

    // Flat warnings tab
    if !snapshot.warnings.is_empty() {
        let _ = writeln!(out, "<details><summary>All warnings</summary>");
        let rows: Vec<Vec<String>> = snapshot
            .warnings
            .iter()
            .map(|w| {
                vec![
                    format!("{:?}", w.severity),
                    w.source.clone(),
                    w.resource.clone().unwrap_or_default(),
                    w.message.clone(),
                    w.suggestion.clone().unwrap_or_default(),
                ]
            })
            .collect();
        table(
            &mut out,
            &["Severity", "Source", "Resource", "Message", "Suggested action"],
            &rows,
        );
        let _ = writeln!(out, "</details>");
    }

    let _ = writeln!(out, "</main>\n<script>{SCRIPT}</script>\n</body>\n</html>");
    out
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_snapshot;
    use super::*;

    #[test]
    fn self_contained_document() {
        let out = render(&sample_snapshot());
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains("<style>"));
        assert!(out.contains("<script>"));
        // No external references
        assert!(!out.contains("http://"));
        assert!(!out.contains("https://cdn"));
        assert!(out.contains("web01"));
        assert!(out.contains("dismissWarning"));
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("a<b>&\"c\"'d'"), "a&lt;b&gt;&amp;&quot;c&quot;&#39;d&#39;");
    }

    #[test]
    fn warning_panel_and_cards() {
        let out = render(&sample_snapshot());
        assert!(out.contains("sev-warn"));
        assert!(out.contains("Packages added"));
        assert!(out.contains("Kickstart at deploy"));
    }
}
