use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Byte retrieval for uploaded attachments by their opaque location reference
#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    async fn read(&self, location_ref: &str) -> Result<Bytes>;

    /// Stores an upload and returns its location reference
    async fn save(&self, original_name: &str, data: &[u8]) -> Result<String>;
}

/// Uploads kept as flat files in one directory; the location reference is the file name
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create uploads directory {}", root.display()))?;
        info!("Attachment storage at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location_ref: &str) -> Result<PathBuf> {
        let is_plain_name = !location_ref.is_empty()
            && !location_ref.contains(['/', '\\'])
            && location_ref != "."
            && location_ref != "..";
        if !is_plain_name {
            bail!("Invalid attachment reference: {}", location_ref);
        }
        Ok(self.root.join(location_ref))
    }

    /// `<millis>-<random><ext>`, keeping the original extension
    fn unique_name(original_name: &str) -> String {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        format!(
            "{}-{}{}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>() % 1_000_000_000,
            ext
        )
    }
}

#[async_trait]
impl AttachmentStorage for LocalFileStorage {
    async fn read(&self, location_ref: &str) -> Result<Bytes> {
        let path = self.resolve(location_ref)?;
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        Ok(Bytes::from(data))
    }

    async fn save(&self, original_name: &str, data: &[u8]) -> Result<String> {
        let name = Self::unique_name(original_name);
        let path = self.root.join(&name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write attachment {}", path.display()))?;
        debug!("Stored upload {} as {} ({} bytes)", original_name, name, data.len());
        Ok(name)
    }
}
