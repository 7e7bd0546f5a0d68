pub mod attachment_store;
pub mod completion;
pub mod secret_store;

pub use attachment_store::{AttachmentStore, AttachmentStoreError};
pub use completion::{
    AnthropicClient, CompletionError, CompletionService, ImageInput, API_KEY_SECRET,
};
pub use secret_store::{JsonSecretStore, SecretStore};
