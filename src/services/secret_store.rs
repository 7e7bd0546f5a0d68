use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::repositories::{BoxFuture, RepositoryError, RepositoryResult};

/// Opaque secret store consumed by the completion client.
/// Holds exactly one secret today: the AI provider credential.
pub trait SecretStore: Send + Sync + 'static {
    /// Look up a secret by name. Absence and read failures both yield `None`.
    fn get(&self, name: &str) -> BoxFuture<'static, Option<String>>;

    /// Store a secret under the given name
    fn set(&self, name: &str, value: String) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Remove a secret
    fn delete(&self, name: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}

/// JSON file-backed secret store at ~/.config/fixit/secrets.json
pub struct JsonSecretStore {
    file_path: PathBuf,
}

impl JsonSecretStore {
    /// Create a store with the XDG-compliant default path
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepositoryError::InitializationError {
            message: "Could not determine config directory".to_string(),
        })?;

        Ok(Self {
            file_path: config_dir.join("fixit").join("secrets.json"),
        })
    }

    /// Create a store backed by an explicit file path
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    async fn load_map(path: &PathBuf) -> RepositoryResult<HashMap<String, String>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(HashMap::new());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let map = serde_json::from_str(&contents)?;
        Ok(map)
    }

    async fn save_map(path: &PathBuf, map: &HashMap<String, String>) -> RepositoryResult<()> {
        let json = serde_json::to_string_pretty(map)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, path).await?;

        Ok(())
    }
}

impl SecretStore for JsonSecretStore {
    fn get(&self, name: &str) -> BoxFuture<'static, Option<String>> {
        let path = self.file_path.clone();
        let name = name.to_string();

        Box::pin(async move {
            match Self::load_map(&path).await {
                Ok(map) => map.get(&name).cloned(),
                Err(e) => {
                    warn!(error = %e, "Failed to read secret store");
                    None
                }
            }
        })
    }

    fn set(&self, name: &str, value: String) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();
        let name = name.to_string();

        Box::pin(async move {
            let mut map = Self::load_map(&path).await?;
            map.insert(name, value);
            Self::save_map(&path, &map).await
        })
    }

    fn delete(&self, name: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();
        let name = name.to_string();

        Box::pin(async move {
            let mut map = Self::load_map(&path).await?;
            map.remove(&name);
            Self::save_map(&path, &map).await
        })
    }
}
