//! Adapter process management.
//!
//! Spawns the peer-hosting child with piped standard streams and owns its
//! lifetime. The caller wires stdout into the transport bridge and stdin
//! into the communication layer.

use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::Result;

/// Resolved launch description for the adapter child process. Supplied by
/// the host's toolchain/configuration layer.
#[derive(Debug, Clone)]
pub struct AdapterLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

impl AdapterLaunch {
    pub fn new(command: impl Into<String>) -> Self {
        AdapterLaunch {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
        }
    }
}

pub struct AdapterProcess {
    child: Child,
}

impl AdapterProcess {
    /// Start the adapter with all three standard streams piped.
    pub fn start(launch: &AdapterLaunch) -> Result<Self> {
        log::debug!("starting adapter process: {} {:?}", launch.command, launch.args);

        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &launch.cwd {
            command.current_dir(cwd);
        }
        let child = command.spawn()?;

        log::debug!("adapter process started, pid {:?}", child.id());
        Ok(AdapterProcess { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}
