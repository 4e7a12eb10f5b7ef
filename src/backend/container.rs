use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

use super::{Backend, BackendError};
use crate::config::Settings;
use crate::pty::{self, Pty};
use crate::session::SessionId;

const TERM: &str = "xterm-256color";

/// Runs every session in a throwaway container through a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    runtime: String,
    image: String,
    run_options: Vec<String>,
    command: Vec<String>,
}

impl ContainerBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            runtime: settings.runtime.clone(),
            image: settings.image.clone(),
            run_options: settings.run_options.clone(),
            command: settings.command.clone(),
        }
    }

    fn pull_args(&self) -> Vec<String> {
        vec!["pull".to_string(), self.image.clone()]
    }

    fn prune_args(&self) -> Vec<String> {
        ["image", "prune", "-f"].map(String::from).to_vec()
    }

    fn run_args(&self, id: &SessionId) -> Vec<String> {
        let mut args: Vec<String> = ["run", "--rm", "-it", "--name"].map(String::from).to_vec();
        args.push(id.to_string());
        args.extend(self.run_options.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }

    fn kill_args(&self, id: &SessionId) -> Vec<String> {
        vec!["kill".to_string(), id.to_string()]
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.runtime);
        command.args(args).env("TERM", TERM);
        command
    }

    fn spawn_on_pty(&self, args: &[String]) -> Result<(Pty, Child), BackendError> {
        pty::spawn(self.command(args)).map_err(|source| {
            tracing::warn!(runtime = %self.runtime, error = %source, "Couldn't start container runtime CLI");
            BackendError::Unavailable {
                program: self.runtime.clone(),
                source,
            }
        })
    }

    /// Run a preparation step on a PTY, forwarding its output verbatim.
    async fn run_step<W>(&self, step: &'static str, args: &[String], out: &mut W) -> Result<(), BackendError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (mut pty, mut child) = self.spawn_on_pty(args)?;
        let mut buf = vec![0u8; 4096];

        loop {
            let n = pty.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Err(e) = async {
                out.write_all(&buf[..n]).await?;
                out.flush().await
            }
            .await
            {
                tracing::debug!(step, error = %e, "Client went away during preparation");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(e.into());
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            tracing::warn!(step, image = %self.image, status = %status, "Preparation step failed");
            return Err(BackendError::Failed { step, status });
        }
        Ok(())
    }
}

impl Backend for ContainerBackend {
    type Pty = Pty;
    type Process = Child;

    async fn prepare<W>(&self, out: &mut W) -> Result<(), BackendError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.run_step("pull", &self.pull_args(), out).await?;
        self.run_step("image prune", &self.prune_args(), out).await
    }

    async fn start(&self, id: &SessionId) -> Result<(Pty, Child), BackendError> {
        let (pty, child) = self.spawn_on_pty(&self.run_args(id))?;
        tracing::debug!(session = %id, image = %self.image, pid = ?child.id(), "Container started");
        Ok((pty, child))
    }

    async fn stop(&self, id: &SessionId, mut child: Child) {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                tracing::debug!(session = %id, error = %e, "Couldn't signal container CLI");
            }
        }

        let kill = self
            .command(&self.kill_args(id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match kill {
            // Nonzero usually means the container is already gone.
            Ok(status) if !status.success() => {
                tracing::debug!(session = %id, status = %status, "Container kill reported failure")
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(runtime = %self.runtime, error = %e, "Couldn't start container runtime CLI")
            }
        }

        match child.wait().await {
            Ok(status) => tracing::debug!(session = %id, image = %self.image, status = %status, "Container exited"),
            Err(e) => tracing::warn!(session = %id, error = %e, "Couldn't wait for container CLI"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(run_options: &[&str], command: &[&str]) -> ContainerBackend {
        ContainerBackend::new(&Settings {
            image: "alpine:3".to_string(),
            run_options: run_options.iter().map(|s| s.to_string()).collect(),
            command: command.iter().map(|s| s.to_string()).collect(),
            ..Settings::default()
        })
    }

    #[test]
    fn test_run_args_with_overrides() {
        let id = SessionId::new();
        let args = backend(&["--memory", "64m"], &["/bin/sh", "-l"]).run_args(&id);
        assert_eq!(
            args,
            vec![
                "run".to_string(),
                "--rm".to_string(),
                "-it".to_string(),
                "--name".to_string(),
                id.to_string(),
                "--memory".to_string(),
                "64m".to_string(),
                "alpine:3".to_string(),
                "/bin/sh".to_string(),
                "-l".to_string(),
            ]
        );
    }

    #[test]
    fn test_run_args_default_command() {
        let id = SessionId::new();
        let args = backend(&[], &[]).run_args(&id);
        assert_eq!(args.last().map(String::as_str), Some("alpine:3"));
        assert_eq!(args[4], id.to_string());
    }

    #[test]
    fn test_maintenance_args() {
        let id = SessionId::new();
        let backend = backend(&[], &[]);
        assert_eq!(backend.pull_args(), vec!["pull", "alpine:3"]);
        assert_eq!(backend.prune_args(), vec!["image", "prune", "-f"]);
        assert_eq!(backend.kill_args(&id), vec!["kill".to_string(), id.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_runtime_is_unavailable() {
        let backend = ContainerBackend::new(&Settings {
            runtime: "/nonexistent/ttypub-runtime".to_string(),
            ..Settings::default()
        });
        let mut out = Vec::new();
        let err = backend.prepare(&mut out).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_is_reported() {
        let backend = ContainerBackend::new(&Settings {
            runtime: "/bin/false".to_string(),
            ..Settings::default()
        });
        let mut out = Vec::new();
        let err = backend.prepare(&mut out).await.unwrap_err();
        assert!(matches!(err, BackendError::Failed { step: "pull", .. }));
    }
}
