//! Container workloads: quadlet units, compose files, optional live
//! enumeration.

use std::collections::BTreeMap;

use anyhow::Result;
use camino::Utf8PathBuf;
use serde::Deserialize;

use super::{InspectContext, Inspector};
use crate::snapshot::{ComposeFile, ContainersSection, LiveContainer, QuadletUnit, Snapshot};

const NAME: &str = "containers";

/// Collects the containers section.
#[derive(Debug)]
pub(crate) struct ContainerInspector;

/// Extract the `Image=` reference from a quadlet unit body.
pub(crate) fn quadlet_image(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|l| l.trim().strip_prefix("Image="))
        .map(|v| v.trim().to_string())
        .next()
}

/// Minimal per-service `image:` extraction from a compose document.
/// Deliberately textual: we only need the service-to-image mapping, not
/// a full document model.
pub(crate) fn compose_images(body: &str) -> BTreeMap<String, String> {
    let mut ret = BTreeMap::new();
    let mut in_services = false;
    let mut service: Option<(String, usize)> = None;
    for line in body.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start().starts_with('#') || trimmed.is_empty() {
            continue;
        }
        let indent = trimmed.len() - trimmed.trim_start().len();
        let content = trimmed.trim_start();
        if indent == 0 {
            in_services = content == "services:";
            service = None;
            continue;
        }
        if !in_services {
            continue;
        }
        if let Some(name) = content.strip_suffix(':').filter(|n| !n.contains(' ')) {
            match service {
                Some((_, sindent)) if indent > sindent => {}
                _ => {
                    service = Some((name.to_string(), indent));
                    continue;
                }
            }
        }
        if let Some((name, sindent)) = service.as_ref() {
            if indent > *sindent {
                if let Some(image) = content.strip_prefix("image:") {
                    ret.insert(name.clone(), image.trim().trim_matches('"').to_string());
                }
            } else {
                service = None;
            }
        }
    }
    ret
}

/// Shape of `podman ps --format json`.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(default, alias = "Names")]
    names: Vec<String>,
    #[serde(default, alias = "Image")]
    image: String,
    #[serde(default, alias = "State")]
    state: String,
}

fn parse_podman_ps(out: &str) -> Result<Vec<LiveContainer>> {
    let entries: Vec<PsEntry> = serde_json::from_str(out)?;
    Ok(entries
        .into_iter()
        .map(|e| LiveContainer {
            name: e.names.first().cloned().unwrap_or_default(),
            image: e.image,
            state: e.state,
        })
        .collect())
}

const COMPOSE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

impl Inspector for ContainerInspector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &InspectContext, snapshot: &mut Snapshot) -> Result<()> {
        let mut section = ContainersSection::default();

        let quadlet_dir = "etc/containers/systemd";
        for name in ctx.list_dir(quadlet_dir)? {
            if !name.ends_with(".container")
                && !name.ends_with(".volume")
                && !name.ends_with(".network")
                && !name.ends_with(".kube")
            {
                continue;
            }
            let Some(file) = ctx.capture(NAME, format!("{quadlet_dir}/{name}")) else {
                continue;
            };
            section.quadlets.push(QuadletUnit {
                name: name.clone(),
                image: quadlet_image(file.content.as_deref().unwrap_or_default()),
                file,
            });
        }

        for root in ["opt", "srv"] {
            let base = ctx.root_path.join(root);
            for entry in walkdir::WalkDir::new(&base)
                .max_depth(4)
                .follow_links(false)
                .into_iter()
                .flatten()
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(fname) = entry.file_name().to_str() else { continue };
                if !COMPOSE_NAMES.contains(&fname) {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else { continue };
                let Ok(rel) = path.strip_prefix(&ctx.root_path) else { continue };
                if let Some(body) = ctx.read_optional(rel)? {
                    section.compose_files.push(ComposeFile {
                        path: rel.to_owned(),
                        services: compose_images(&body),
                    });
                }
            }
        }
        section.compose_files.sort_by(|a, b| a.path.cmp(&b.path));

        if ctx.opts.query_podman {
            match ctx.live.podman_ps.as_deref() {
                Some(out) => match parse_podman_ps(out) {
                    Ok(live) => section.live = live,
                    Err(e) => {
                        ctx.warnings
                            .info(NAME, format!("Could not parse live container list: {e:#}"));
                        section.partial = true;
                    }
                },
                None => {
                    ctx.warnings.info(
                        NAME,
                        "Live container enumeration requested but the host runtime was unreachable",
                    );
                    section.partial = true;
                }
            }
        }

        snapshot.containers = Some(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn quadlet_image_extraction() {
        let body = indoc! { "
            [Unit]
            Description=Metrics collector

            [Container]
            Image=quay.io/example/collector:1.4
            PublishPort=9100:9100

            [Install]
            WantedBy=multi-user.target
        " };
        assert_eq!(quadlet_image(body).as_deref(), Some("quay.io/example/collector:1.4"));
        assert_eq!(quadlet_image("[Container]\n"), None);
    }

    #[test]
    fn compose_service_images() {
        let body = indoc! { r#"
            version: "3"
            services:
              web:
                image: nginx:1.25
                ports:
                  - "80:80"
              db:
                image: "postgres:16"
              worker:
                build: .
            volumes:
              data: {}
        "# };
        let images = compose_images(body);
        assert_eq!(images.get("web").map(String::as_str), Some("nginx:1.25"));
        assert_eq!(images.get("db").map(String::as_str), Some("postgres:16"));
        // A service without image: (build-only) contributes nothing
        assert!(!images.contains_key("worker"));
        assert!(!images.contains_key("data"));
    }

    #[test]
    fn podman_ps_json() {
        let out = r#"[{"Names": ["web"], "Image": "nginx:1.25", "State": "running"}]"#;
        let live = parse_podman_ps(out).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "web");
        assert_eq!(live[0].state, "running");
    }
}
