use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::DumpError;

/// One external program run: argv, environment and optional file redirections.
#[derive(Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub stdin_from: Option<PathBuf>,
    pub stdout_to: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin_from: None,
            stdout_to: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_from = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

// Environment values carry credentials.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("stdin_from", &self.stdin_from)
            .field("stdout_to", &self.stdout_to)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub success: bool,
    /// Empty when stdout was redirected to a file.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Turns a non-zero exit into [`DumpError::ToolFailed`] carrying stderr.
    pub fn check(self, program: &str) -> Result<Self, DumpError> {
        if self.success {
            return Ok(self);
        }
        Err(DumpError::ToolFailed {
            program: program.to_owned(),
            status: match self.code {
                Some(code) => format!("exit code {code}"),
                None => "signal".to_owned(),
            },
            stderr: String::from_utf8_lossy(&self.stderr).trim().to_owned(),
        })
    }
}

#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, DumpError>;
}

/// Runs programs with `tokio::process`; a timed-out child is killed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, DumpError> {
        let program = invocation.program_name();
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        match &invocation.stdin_from {
            Some(path) => cmd.stdin(Stdio::from(open_input(path)?)),
            None => cmd.stdin(Stdio::null()),
        };
        match &invocation.stdout_to {
            Some(path) => cmd.stdout(Stdio::from(File::create(path)?)),
            None => cmd.stdout(Stdio::piped()),
        };

        debug!(program = %program, args = ?invocation.args, "spawning external tool");
        let child = cmd.spawn().map_err(|source| DumpError::Spawn {
            program: program.clone(),
            source,
        })?;

        let waiting = child.wait_with_output();
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, waiting)
                .await
                .map_err(|_| DumpError::ToolTimeout {
                    program: program.clone(),
                    timeout: limit,
                })??,
            None => waiting.await?,
        };

        Ok(ProcessOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn open_input(path: &Path) -> Result<File, DumpError> {
    Ok(File::open(path)?)
}
