//! Daemon Process Control
//!
//! Shells out to systemd and the cockroach binary. Everything here is a
//! mechanical wrapper; the coordinator owns the sequencing.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CockroachConfig;
use crate::error::{Error, Result};

/// Captured output of a daemon introspection command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Control surface over the database daemon process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Install the daemon binary
    async fn install(&self) -> Result<()>;

    /// Start the daemon service
    async fn start(&self) -> Result<()>;

    /// Restart the daemon service
    async fn restart(&self) -> Result<()>;

    /// Issue the one-time cluster initialization command
    async fn run_init(&self) -> Result<()>;

    /// Query the daemon's gossip values; errors only on spawn failure,
    /// a non-zero exit is reported through the output
    async fn query_gossip(&self) -> Result<CommandOutput>;

    /// Write the rendered systemd unit and reload the daemon manager
    async fn apply_unit(&self, content: &str) -> Result<()>;
}

/// systemd-backed controller for the CockroachDB daemon
pub struct CockroachControl {
    binary: PathBuf,
    install_dir: PathBuf,
    version: String,
    service: String,
    unit_path: PathBuf,
}

impl CockroachControl {
    pub fn new(config: &CockroachConfig) -> Self {
        Self {
            binary: config.binary_path(),
            install_dir: config.install_dir.clone(),
            version: config.version.clone(),
            service: config.service.clone(),
            unit_path: PathBuf::from(format!("/etc/systemd/system/{}", config.service)),
        }
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Daemon(format!("Failed to spawn {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn systemctl(&self, verb: &str) -> Result<()> {
        self.run_checked("systemctl", &[verb, &self.service]).await
    }
}

#[async_trait]
impl ProcessControl for CockroachControl {
    async fn install(&self) -> Result<()> {
        if self.binary.exists() {
            tracing::info!("Cockroach binary already present at {:?}", self.binary);
            return Ok(());
        }

        // Architecture is hard-coded until it becomes important.
        let arch = "amd64";
        let cmd = format!(
            "wget -qO- https://binaries.cockroachdb.com/cockroach-{version}.linux-{arch}.tgz \
             | tar -C {install_dir} -xvz --wildcards --strip-components 1 \
             --no-anchored 'cockroach*/cockroach'",
            version = self.version,
            arch = arch,
            install_dir = self.install_dir.display(),
        );
        tracing::info!("Installing cockroach {} into {:?}", self.version, self.install_dir);
        self.run_checked("sh", &["-c", &cmd]).await
    }

    async fn start(&self) -> Result<()> {
        self.systemctl("start").await
    }

    async fn restart(&self) -> Result<()> {
        self.systemctl("restart").await
    }

    async fn run_init(&self) -> Result<()> {
        let binary = self.binary.to_string_lossy().into_owned();
        self.run_checked(&binary, &["init", "--insecure"]).await
    }

    async fn query_gossip(&self) -> Result<CommandOutput> {
        let output = Command::new(&self.binary)
            .args(["debug", "gossip-values", "--insecure"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Daemon(format!("Failed to spawn gossip query: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }

    async fn apply_unit(&self, content: &str) -> Result<()> {
        tokio::fs::write(&self.unit_path, content).await?;
        self.run_checked("systemctl", &["daemon-reload"]).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted process controller for coordinator and resolver tests.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Fake controller that records calls and replays scripted gossip output
    #[derive(Default)]
    pub struct ScriptedControl {
        pub start_calls: AtomicU32,
        pub restart_calls: AtomicU32,
        pub init_calls: AtomicU32,
        pub gossip_calls: AtomicU32,
        pub unit_contents: Mutex<Vec<String>>,
        gossip_script: Mutex<Vec<CommandOutput>>,
    }

    impl ScriptedControl {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue one gossip query result; the last queued result repeats
        /// once the script runs out
        pub fn push_gossip(&self, output: CommandOutput) {
            self.gossip_script.lock().unwrap().push(output);
        }

        pub fn push_gossip_success(&self, stdout: &str) {
            self.push_gossip(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                success: true,
            });
        }

        pub fn push_gossip_failure(&self, stderr: &str) {
            self.push_gossip(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                success: false,
            });
        }
    }

    #[async_trait]
    impl ProcessControl for ScriptedControl {
        async fn install(&self) -> Result<()> {
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart(&self) -> Result<()> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_init(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query_gossip(&self) -> Result<CommandOutput> {
            self.gossip_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.gossip_script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                script
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::Daemon("no scripted gossip output".into()))
            }
        }

        async fn apply_unit(&self, content: &str) -> Result<()> {
            self.unit_contents.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }
}
