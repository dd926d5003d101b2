//! Extensions for [`std::process::Command`] used by query-style callers.

use std::process::Command;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Execute the child process, requiring a successful exit.
    fn run(&mut self) -> Result<()>;
    /// Execute the child process and capture its stdout as a string,
    /// requiring a successful exit. stderr is passed through.
    fn run_get_string(&mut self) -> Result<String>;
    /// Execute the child process and parse its stdout as JSON.
    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T>;
}

/// Render the exit status of a process in a human-friendly way.
fn check_status(st: std::process::ExitStatus) -> Result<()> {
    if st.success() {
        return Ok(());
    }
    if let Some(code) = st.code() {
        anyhow::bail!("Subprocess exited with code {code}")
    }
    anyhow::bail!("Subprocess terminated abnormally: {st:?}")
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        tracing::trace!("exec: {self:?}");
        let st = self.status().context("Spawning subprocess")?;
        check_status(st)
    }

    fn run_get_string(&mut self) -> Result<String> {
        tracing::trace!("exec: {self:?}");
        let o = self.output().context("Spawning subprocess")?;
        check_status(o.status)?;
        String::from_utf8(o.stdout).context("Parsing subprocess output as UTF-8")
    }

    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let o = self.run_get_string()?;
        serde_json::from_str(&o).context("Parsing subprocess output as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_run_ext() -> Result<()> {
        // Successful execution
        Command::new("true").run()?;
        assert!(Command::new("false").run().is_err());
        let out = Command::new("echo").arg("hello").run_get_string()?;
        assert_eq!(out.as_str(), "hello\n");
        Ok(())
    }

    #[test]
    fn command_json() -> Result<()> {
        #[derive(serde::Deserialize)]
        struct Foo {
            a: String,
            b: u32,
        }
        let v: Foo = Command::new("echo")
            .arg(r#"{"a": "somevalue", "b": 42, "ignored": null}"#)
            .run_and_parse_json()?;
        assert_eq!(v.a, "somevalue");
        assert_eq!(v.b, 42);
        Ok(())
    }
}
