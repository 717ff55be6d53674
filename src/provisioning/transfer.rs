use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::RemoteError;
use super::types::TransferCredentials;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Opens file-transfer sessions against a hosted site.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn open(
        &self,
        credentials: &TransferCredentials,
    ) -> Result<Box<dyn TransferSession>, RemoteError>;
}

/// An open session. Paths are relative to the credentials' document root.
#[async_trait]
pub trait TransferSession: Send {
    /// Create or replace `path` with `contents`.
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    /// Run `command` in the document root.
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Writes into a locally mounted view of remote hosts
/// (`{mount}/{user}@{host}/{root}`), e.g. an sshfs mount or a staging
/// directory that another process syncs.
#[derive(Debug, Clone)]
pub struct MirrorTransfer {
    mount: PathBuf,
    allow_exec: bool,
}

impl MirrorTransfer {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into(),
            allow_exec: false,
        }
    }

    /// Run post-install commands with `sh -c` in the mirrored root.
    pub fn with_exec(mut self, allow: bool) -> Self {
        self.allow_exec = allow;
        self
    }

    pub fn site_root(&self, credentials: &TransferCredentials) -> PathBuf {
        self.mount
            .join(format!("{}@{}", credentials.user, credentials.host))
            .join(credentials.root.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileTransfer for MirrorTransfer {
    async fn open(
        &self,
        credentials: &TransferCredentials,
    ) -> Result<Box<dyn TransferSession>, RemoteError> {
        let root = self.site_root(credentials);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {e}", root.display())))?;
        debug!(root = %root.display(), "opened mirror session");
        Ok(Box::new(MirrorSession {
            root,
            allow_exec: self.allow_exec,
        }))
    }
}

struct MirrorSession {
    root: PathBuf,
    allow_exec: bool,
}

#[async_trait]
impl TransferSession for MirrorSession {
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let target = self.root.join(relative_path(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Transfer(format!("{}: {e}", parent.display())))?;
        }
        let tmp = target.with_extension("partial");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {e}", target.display())))?;
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        if !self.allow_exec {
            warn!(command, "remote exec disabled for mirror transfer, skipping");
            return Ok(CommandOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;
        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.code != 0 {
            return Err(RemoteError::CommandFailed {
                code: result.code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

/// Reject absolute paths and `..` so a manifest cannot escape the root.
fn relative_path(path: &str) -> Result<&Path, RemoteError> {
    let p = Path::new(path);
    let clean = p
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || !clean {
        return Err(RemoteError::InvalidPath(path.to_string()));
    }
    Ok(p)
}
