//! The secrets-review document: everything the redaction pass touched.

use std::fmt::Write as _;

use crate::snapshot::{SecretLocation, Snapshot};

pub(crate) fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Secrets review\n");
    if snapshot.secrets_review.is_empty() {
        let _ = writeln!(out, "No secret patterns matched and no files were excluded.");
        return out;
    }
    let _ = writeln!(
        out,
        "{} redaction event(s). Redacted values must be re-provisioned at deploy \
         time (kickstart, a secret store, or day-2 configuration); they are not in \
         the image or the snapshot.\n",
        snapshot.secrets_review.len()
    );
    let _ = writeln!(out, "| File | Class | Location | Token |\n|---|---|---|---|");
    for e in &snapshot.secrets_review {
        let location = match e.location {
            SecretLocation::Line(n) => format!("line {n}"),
            SecretLocation::EntireFile => "entire file".into(),
        };
        let _ = writeln!(
            out,
            "| /{} | {} | {} | {} |",
            e.path,
            e.class,
            location,
            e.token.as_deref().unwrap_or("-")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{SecretEvent, Snapshot};
    use camino::Utf8PathBuf;

    #[test]
    fn events_render_in_order() {
        let mut s = Snapshot::new();
        s.sealed = true;
        s.secrets_review = vec![
            SecretEvent {
                path: Utf8PathBuf::from("etc/app.conf"),
                class: "password".into(),
                token: Some("REDACTED_password_ab12cd34".into()),
                location: SecretLocation::Line(3),
            },
            SecretEvent {
                path: Utf8PathBuf::from("etc/pki/web.key"),
                class: "path-exclusion".into(),
                token: None,
                location: SecretLocation::EntireFile,
            },
        ];
        let out = render(&s);
        let first = out.find("etc/app.conf").unwrap();
        let second = out.find("etc/pki/web.key").unwrap();
        assert!(first < second);
        assert!(out.contains("| /etc/app.conf | password | line 3 | REDACTED_password_ab12cd34 |"));
        assert!(out.contains("entire file"));
    }

    #[test]
    fn empty_review() {
        let mut s = Snapshot::new();
        s.sealed = true;
        assert!(render(&s).contains("No secret patterns matched"));
    }
}
