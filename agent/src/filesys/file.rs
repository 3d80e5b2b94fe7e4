//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::errors::AgentError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, AgentError> {
        let mut file = fs::File::open(&self.path).await.map_err(|e| {
            AgentError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", self.path.display()),
            ))
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn test_read_json() {
        let path = std::env::temp_dir().join(format!("edgemgr-file-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, r#"{"name":"web"}"#).await.unwrap();

        let file = File::new(&path);
        assert!(file.exists().await);
        let sample: Sample = file.read_json().await.unwrap();
        assert_eq!(sample.name, "web");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let file = File::new("/nonexistent/edgemgr/settings.json");
        let err = file.read_string().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/edgemgr/settings.json"));
    }
}
