use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{RepositoryError, RepositoryResult};
use super::project_repository::{BoxFuture, ProjectRepository};
use crate::models::Project;

struct Inner {
    projects: HashMap<String, Project>,
    save_attempts: usize,
    fail_next_saves: usize,
}

/// In-memory repository for projects.
/// Useful for testing and development; supports injected save failures so
/// rollback paths can be exercised.
#[derive(Clone)]
pub struct InMemoryProjectRepository {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                projects: HashMap::new(),
                save_attempts: 0,
                fail_next_saves: 0,
            })),
        }
    }

    /// Make the next `n` save calls fail with an IO error
    pub fn fail_next_saves(&self, n: usize) {
        self.inner.lock().fail_next_saves = n;
    }

    /// Number of save calls attempted so far, including failed ones
    pub fn save_attempts(&self) -> usize {
        self.inner.lock().save_attempts
    }
}

impl Default for InMemoryProjectRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectRepository for InMemoryProjectRepository {
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Project>>> {
        let inner = self.inner.clone();

        Box::pin(async move {
            let store = inner.lock();

            let mut result: Vec<Project> = store.projects.values().cloned().collect();

            // Sort by updated_at descending
            result.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));

            Ok(result)
        })
    }

    fn save(&self, project: &Project) -> BoxFuture<'static, RepositoryResult<()>> {
        let inner = self.inner.clone();
        let project = project.clone();

        Box::pin(async move {
            let mut store = inner.lock();
            store.save_attempts += 1;

            if store.fail_next_saves > 0 {
                store.fail_next_saves -= 1;
                return Err(RepositoryError::IoError(std::io::Error::other(
                    "injected save failure",
                )));
            }

            store.projects.insert(project.id().to_string(), project);

            Ok(())
        })
    }
}
