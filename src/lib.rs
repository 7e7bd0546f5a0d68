pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;

pub use controllers::{ConversationController, SendError, SendOutcome};
pub use models::{Attachment, AttachmentKind, Message, Project};
pub use repositories::{InMemoryProjectRepository, ProjectJsonRepository, ProjectRepository};
pub use services::{
    AnthropicClient, AttachmentStore, CompletionService, ImageInput, JsonSecretStore, SecretStore,
    API_KEY_SECRET,
};
