pub mod project;

pub use project::{Attachment, AttachmentKind, Message, Project, ProjectSnapshot};
