use std::{
    ffi::OsStr,
    io::Seek,
    process::{Command, Stdio},
};

use anyhow::{Context, Result};

/// A subprocess with an attached description for error reporting.
///
/// Inspectors only ever *query*; every invocation here is read-only with
/// respect to the host.
pub(crate) struct Task {
    description: String,
    verbose: bool,
    pub(crate) cmd: Command,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("description", &self.description)
            .finish()
    }
}

impl Task {
    pub(crate) fn new(description: impl AsRef<str>, exe: impl AsRef<str>) -> Self {
        Self::new_cmd(description, Command::new(exe.as_ref()))
    }

    pub(crate) fn new_cmd(description: impl AsRef<str>, mut cmd: Command) -> Self {
        let description = description.as_ref().to_string();
        // Default to noninteractive
        cmd.stdin(Stdio::null());
        Self {
            description,
            verbose: false,
            cmd,
        }
    }

    /// Print the description before running.
    pub(crate) fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub(crate) fn args<S: AsRef<OsStr>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.cmd.args(args);
        self
    }

    /// Run the command, returning an error if the command does not exit
    /// successfully. Output is captured and replayed only on failure.
    pub(crate) fn run(self) -> Result<()> {
        let description = self.description;
        let mut cmd = self.cmd;
        if self.verbose {
            println!("{description}");
        }
        let tmpf = tempfile::tempfile()?;
        cmd.stdout(Stdio::from(tmpf.try_clone()?));
        cmd.stderr(Stdio::from(tmpf.try_clone()?));
        tracing::debug!("exec: {cmd:?}");
        let st = cmd.status()?;
        if !st.success() {
            let mut output = tmpf;
            output.seek(std::io::SeekFrom::Start(0))?;
            let mut stderr = std::io::stderr().lock();
            std::io::copy(&mut output, &mut stderr)?;
            anyhow::bail!("Task {description} failed: {st:?}");
        }
        Ok(())
    }

    /// Like [`Self::run`], but return stdout.
    pub(crate) fn read(self) -> Result<String> {
        let description = self.description;
        let mut cmd = self.cmd;
        if self.verbose {
            println!("{description}");
        }
        tracing::debug!("exec: {cmd:?}");
        cmd.stdout(Stdio::piped());
        let child = cmd
            .spawn()
            .with_context(|| format!("Spawning {description} failed"))?;
        let o = child
            .wait_with_output()
            .with_context(|| format!("Executing {description} failed"))?;
        let st = o.status;
        if !st.success() {
            anyhow::bail!("Task {description} failed: {st:?}");
        }
        Ok(String::from_utf8(o.stdout)?)
    }

    /// Like [`Self::read`], but tolerate a nonzero exit, returning stdout
    /// anyway. `rpm -Va` exits nonzero whenever anything fails verification,
    /// which for us is the interesting case, not the error case.
    pub(crate) fn read_lenient(self) -> Result<String> {
        let description = self.description;
        let mut cmd = self.cmd;
        tracing::debug!("exec: {cmd:?}");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        let child = cmd
            .spawn()
            .with_context(|| format!("Spawning {description} failed"))?;
        let o = child
            .wait_with_output()
            .with_context(|| format!("Executing {description} failed"))?;
        Ok(String::from_utf8(o.stdout)?)
    }
}
