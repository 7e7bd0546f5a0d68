pub mod error;
pub mod in_memory_repository;
pub mod project_json_repository;
pub mod project_repository;

pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryProjectRepository;
pub use project_json_repository::ProjectJsonRepository;
pub use project_repository::{BoxFuture, ProjectRepository};
