//! Filesystem metadata adapter

use crate::FactSource;
use async_trait::async_trait;
use eksaudit_core::{Fact, FactSelector, FetchError};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Reads ownership, permission bits and existence of files
///
/// Owner and group ids are resolved to names through passwd/group style
/// databases; an id with no entry is reported numerically.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    passwd_path: PathBuf,
    group_path: PathBuf,
}

impl FileAdapter {
    pub fn new(passwd_path: impl Into<PathBuf>, group_path: impl Into<PathBuf>) -> Self {
        Self {
            passwd_path: passwd_path.into(),
            group_path: group_path.into(),
        }
    }

    async fn metadata(&self, path: &str) -> Result<std::fs::Metadata, FetchError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| FetchError::from_io(path, &e))
    }

    /// Owner and group names of `path`
    pub async fn ownership(&self, path: &str) -> Result<(String, String), FetchError> {
        let meta = self.metadata(path).await?;
        let owner = self.name_for_id(&self.passwd_path, meta.uid()).await;
        let group = self.name_for_id(&self.group_path, meta.gid()).await;
        trace!("{} owned by {}:{}", path, owner, group);
        Ok((owner, group))
    }

    /// Permission bits of `path` (including setuid/setgid/sticky)
    pub async fn mode(&self, path: &str) -> Result<u32, FetchError> {
        let meta = self.metadata(path).await?;
        Ok(meta.mode() & 0o7777)
    }

    /// Whether `path` exists; only a missing entry counts as absent
    pub async fn exists(&self, path: &str) -> Result<bool, FetchError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FetchError::from_io(path, &e)),
        }
    }

    async fn name_for_id(&self, database: &Path, id: u32) -> String {
        match tokio::fs::read_to_string(database).await {
            Ok(content) => lookup_name(&content, id).unwrap_or_else(|| id.to_string()),
            Err(e) => {
                trace!("Cannot read {}: {}", database.display(), e);
                id.to_string()
            }
        }
    }
}

impl Default for FileAdapter {
    fn default() -> Self {
        Self::new("/etc/passwd", "/etc/group")
    }
}

/// Find the name whose numeric id (third field) matches in a colon-separated database
pub fn lookup_name(database: &str, id: u32) -> Option<String> {
    database
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let entry_id = fields.nth(1)?.parse::<u32>().ok()?;
            (entry_id == id).then(|| name.to_string())
        })
}

#[async_trait]
impl FactSource for FileAdapter {
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
        match selector {
            FactSelector::FileOwnership { path } => {
                let (owner, group) = self.ownership(path).await?;
                Ok(Fact::Ownership { owner, group })
            }
            FactSelector::FileMode { path } => Ok(Fact::Mode(self.mode(path).await?)),
            FactSelector::FileExists { path } => Ok(Fact::Existence(self.exists(path).await?)),
            other => Err(crate::unsupported(other)),
        }
    }
}
