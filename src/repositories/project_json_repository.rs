use std::path::PathBuf;

use super::error::{RepositoryError, RepositoryResult};
use super::project_repository::{BoxFuture, ProjectRepository};
use crate::models::Project;

/// JSON file-based repository for projects.
/// Stores each project as a separate file in ~/.config/fixit/projects/
pub struct ProjectJsonRepository {
    projects_dir: PathBuf,
}

impl ProjectJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let projects_dir = dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("fixit")
            .join("projects");

        Ok(Self { projects_dir })
    }

    /// Create a repository rooted at an explicit directory
    pub fn with_dir(projects_dir: PathBuf) -> Self {
        Self { projects_dir }
    }

    fn project_path(&self, id: &str) -> PathBuf {
        self.projects_dir.join(format!("{}.json", id))
    }
}

impl ProjectRepository for ProjectJsonRepository {
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Project>>> {
        let projects_dir = self.projects_dir.clone();

        Box::pin(async move {
            tokio::fs::create_dir_all(&projects_dir).await?;

            let mut projects = Vec::new();
            let mut entries = tokio::fs::read_dir(&projects_dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();

                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    let content = tokio::fs::read_to_string(&path).await?;
                    let project: Project = serde_json::from_str(&content)?;
                    projects.push(project);
                }
            }

            // Sort by updated_at descending
            projects.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));

            Ok(projects)
        })
    }

    fn save(&self, project: &Project) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.project_path(project.id());
        let projects_dir = self.projects_dir.clone();
        let project = project.clone();

        Box::pin(async move {
            tokio::fs::create_dir_all(&projects_dir).await?;

            let json = serde_json::to_string_pretty(&project)?;

            // Write to file atomically (write to temp, then rename)
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }
}
