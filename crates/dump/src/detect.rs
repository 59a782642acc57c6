use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tenant_backup_core::BackupMethod;
use tracing::debug;

use crate::external::ToolPaths;
use crate::process::{Invocation, ProcessRunner};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// What the runtime environment can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableMethods {
    /// The in-process connector speaks the configured driver. Covers native and portable.
    pub native: bool,
    pub external_dump: bool,
    /// Lets restores of external dumps go through the client binary instead of native replay.
    pub external_restore: bool,
}

impl Default for AvailableMethods {
    fn default() -> Self {
        Self {
            native: true,
            external_dump: false,
            external_restore: false,
        }
    }
}

impl AvailableMethods {
    pub fn contains(self, method: BackupMethod) -> bool {
        match method {
            BackupMethod::ExternalDump => self.external_dump,
            BackupMethod::Native | BackupMethod::Portable => self.native,
        }
    }

    pub fn methods(self) -> Vec<BackupMethod> {
        BackupMethod::PRIORITY
            .into_iter()
            .filter(|m| self.contains(*m))
            .collect()
    }

    /// First available method in [`BackupMethod::PRIORITY`] order. Falls back to native,
    /// which callers then reject when nothing is usable.
    pub fn recommended(self) -> BackupMethod {
        BackupMethod::PRIORITY
            .into_iter()
            .find(|m| self.contains(*m))
            .unwrap_or(BackupMethod::Native)
    }
}

/// Runs the configured binaries with `--version` to see whether they work.
pub struct MethodDetector {
    runner: Arc<dyn ProcessRunner>,
    tools: ToolPaths,
    check_timeout: Duration,
}

impl MethodDetector {
    pub fn new(runner: Arc<dyn ProcessRunner>, tools: ToolPaths) -> Self {
        Self {
            runner,
            tools,
            check_timeout: VERSION_CHECK_TIMEOUT,
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub async fn detect(&self) -> AvailableMethods {
        let external_dump = self.responds(&self.tools.dump).await;
        let external_restore = if self.tools.restore == self.tools.dump {
            external_dump
        } else {
            self.responds(&self.tools.restore).await
        };
        AvailableMethods {
            external_dump,
            external_restore,
            ..AvailableMethods::default()
        }
    }

    async fn responds(&self, program: &Path) -> bool {
        let inv = Invocation::new(program)
            .arg("--version")
            .timeout(self.check_timeout);
        match self.runner.run(&inv).await {
            Ok(out) if out.success => {
                debug!(program = %program.display(), "external tool available");
                true
            }
            Ok(out) => {
                debug!(program = %program.display(), code = ?out.code, "external tool version check failed");
                false
            }
            Err(e) => {
                debug!(program = %program.display(), error = %e, "external tool not usable");
                false
            }
        }
    }
}
