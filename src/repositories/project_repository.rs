use std::future::Future;
use std::pin::Pin;

use super::error::RepositoryResult;
use crate::models::Project;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Repository trait for project persistence
pub trait ProjectRepository: Send + Sync + 'static {
    /// Load all projects from storage, ordered by `updated_at` descending
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Project>>>;

    /// Save a project to storage (upsert by id)
    fn save(&self, project: &Project) -> BoxFuture<'static, RepositoryResult<()>>;
}
