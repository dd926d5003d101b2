//! Run commands in the host's namespaces.
//!
//! The inspection container mounts the host root read-only, but querying
//! the target base image requires executing the *host's* container runtime
//! in the host's namespaces. This module is the only code path that
//! reaches across the host/container boundary to run programs; everything
//! else reads the host through the read-only mount.

use std::os::fd::AsFd;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;

/// The hidden argv[1] sentinel for the re-exec half of the bridge.
pub(crate) const EXEC_SENTINEL: &str = "exec-in-host-namespaces";

/// Default bound on any call through the bridge.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of the privilege probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeResult {
    /// Namespace entry is possible.
    Ok,
    /// Running without real root (user namespace).
    Rootless,
    /// PID 1 is not the host's init; the container lacks the host PID
    /// namespace.
    MissingPidNamespace,
    /// Root, but CAP_SYS_ADMIN is not in the bounding set.
    MissingCapability,
    /// The host has no container runtime we can execute.
    NoRuntime,
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeResult::Ok => "ok",
            ProbeResult::Rootless => "rootless",
            ProbeResult::MissingPidNamespace => "missing-pid-namespace",
            ProbeResult::MissingCapability => "missing-capability",
            ProbeResult::NoRuntime => "no-runtime",
        };
        f.write_str(s)
    }
}

impl ProbeResult {
    /// Operator-facing guidance for a failed probe.
    pub(crate) fn guidance(&self) -> &'static str {
        match self {
            ProbeResult::Ok => "",
            ProbeResult::Rootless => {
                "run the container with rootful podman (sudo); nsenter needs real CAP_SYS_ADMIN"
            }
            ProbeResult::MissingPidNamespace => {
                "run the container with --pid=host so PID 1 is the host's init"
            }
            ProbeResult::MissingCapability => {
                "run the container with --privileged to keep CAP_SYS_ADMIN in the bounding set"
            }
            ProbeResult::NoRuntime => {
                "no podman binary found under the host root; use --baseline-packages for air-gapped hosts"
            }
        }
    }
}

/// Host namespace access is unavailable.
#[derive(Debug, thiserror::Error)]
#[error("host namespace access unavailable ({0}): {guidance}", guidance = self.0.guidance())]
pub(crate) struct PrivilegeError(pub(crate) ProbeResult);

/// A bridge call exceeded its wall-clock bound.
#[derive(Debug, thiserror::Error)]
#[error("timed out after {0:?} executing in host namespaces")]
pub(crate) struct TimeoutError(pub(crate) Duration);

/// Captured result of a bridge call.
#[derive(Debug)]
pub(crate) struct BridgeOutput {
    pub(crate) success: bool,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

/// The one gateway for executing programs in the host's namespaces.
#[derive(Debug, Clone)]
pub(crate) struct HostBridge {
    probe: ProbeResult,
    timeout: Duration,
}

impl HostBridge {
    /// Probe once and construct the bridge. The probe result is memoized
    /// for the life of the process.
    pub(crate) fn new(host_root: &Utf8Path, timeout: Duration) -> Self {
        let probe = probe_host_access(host_root);
        tracing::debug!("privilege probe: {probe}");
        Self { probe, timeout }
    }

    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        Self {
            probe: ProbeResult::NoRuntime,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub(crate) fn probe(&self) -> ProbeResult {
        self.probe
    }

    pub(crate) fn available(&self) -> bool {
        self.probe == ProbeResult::Ok
    }

    /// Execute `argv` in PID 1's mount, UTS, IPC, and network namespaces,
    /// capturing output. Never used to mutate the host.
    pub(crate) async fn run_in_host_namespaces(&self, argv: &[&str]) -> Result<BridgeOutput> {
        if self.probe != ProbeResult::Ok {
            return Err(PrivilegeError(self.probe).into());
        }
        let mut cmd = tokio::process::Command::new("/proc/self/exe");
        cmd.arg(EXEC_SENTINEL);
        cmd.args(argv);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        tracing::debug!("bridge exec: {argv:?}");
        let fut = async {
            let child = cmd.spawn().context("Spawning bridge re-exec")?;
            child
                .wait_with_output()
                .await
                .context("Waiting for bridge re-exec")
        };
        let output = match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r?,
            Err(_) => return Err(TimeoutError(self.timeout).into()),
        };
        Ok(BridgeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Like [`Self::run_in_host_namespaces`], but require success and
    /// return stdout.
    pub(crate) async fn read_in_host_namespaces(&self, argv: &[&str]) -> Result<String> {
        let o = self.run_in_host_namespaces(argv).await?;
        if !o.success {
            anyhow::bail!(
                "Command {:?} failed in host namespaces: {}",
                argv.first().copied().unwrap_or_default(),
                o.stderr.trim()
            );
        }
        Ok(o.stdout)
    }
}

/// The minimal namespace-enter probe against PID 1, with structured
/// reasons on failure.
fn probe_host_access(host_root: &Utf8Path) -> ProbeResult {
    if !rustix::process::getuid().is_root() {
        return ProbeResult::Rootless;
    }
    match rustix::thread::capability_is_in_bounding_set(rustix::thread::Capability::SystemAdmin) {
        Ok(true) => {}
        _ => return ProbeResult::MissingCapability,
    }
    // Without --pid=host, /proc/1 is our own entrypoint and its mount
    // namespace link equals ours.
    let ns_pid1 = match std::fs::read_link("/proc/1/ns/mnt") {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return ProbeResult::MissingCapability
        }
        Err(_) => return ProbeResult::MissingPidNamespace,
    };
    let ns_self = match std::fs::read_link("/proc/self/ns/mnt") {
        Ok(l) => l,
        Err(_) => return ProbeResult::MissingPidNamespace,
    };
    if ns_pid1 == ns_self {
        return ProbeResult::MissingPidNamespace;
    }
    const RUNTIME_PATHS: &[&str] = &["usr/bin/podman", "usr/local/bin/podman", "bin/podman"];
    if !RUNTIME_PATHS
        .iter()
        .any(|p| host_root.join(p).try_exists().unwrap_or(false))
    {
        return ProbeResult::NoRuntime;
    }
    ProbeResult::Ok
}

/// The re-exec half: enter PID 1's namespaces and exec the payload.
/// Reached via the hidden argv sentinel; never returns on success.
#[context("Re-exec in host namespaces")]
pub(crate) fn exec_in_host_namespaces(args: &[std::ffi::OsString]) -> Result<()> {
    let (cmd, args) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Missing command"))?;
    tracing::trace!("{cmd:?} {args:?}");
    use nix::sched::CloneFlags;
    let targets = [
        ("/proc/1/ns/mnt", CloneFlags::CLONE_NEWNS),
        ("/proc/1/ns/uts", CloneFlags::CLONE_NEWUTS),
        ("/proc/1/ns/ipc", CloneFlags::CLONE_NEWIPC),
        ("/proc/1/ns/net", CloneFlags::CLONE_NEWNET),
    ];
    // Open every namespace fd before the first setns; entering the mount
    // namespace changes what /proc refers to.
    let mut fds = Vec::with_capacity(targets.len());
    for (path, flag) in targets {
        let nsfd = std::fs::File::open(path).with_context(|| format!("open {path}"))?;
        fds.push((path, flag, nsfd));
    }
    for (path, flag, nsfd) in &fds {
        nix::sched::setns(nsfd.as_fd(), *flag).with_context(|| format!("setns {path}"))?;
    }
    rustix::process::chdir("/").context("chdir")?;
    Err(Command::new(cmd).args(args).exec()).context("exec")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_display() {
        assert_eq!(ProbeResult::MissingPidNamespace.to_string(), "missing-pid-namespace");
        assert_eq!(ProbeResult::Ok.to_string(), "ok");
    }

    #[tokio::test]
    async fn bridge_refuses_without_probe() {
        let bridge = HostBridge::disconnected();
        let err = bridge
            .run_in_host_namespaces(&["true"])
            .await
            .err()
            .expect("must fail");
        assert!(err.downcast_ref::<PrivilegeError>().is_some());
    }
}
