use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current Unix timestamp in seconds
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Kind of payload an attachment refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

/// A stored image referenced by a message.
///
/// The binary payload is not embedded here; it lives in the attachment store
/// and is loaded on demand via `local_path`. The bytes must be committed to
/// the store before the message referencing them is constructed, otherwise a
/// later load comes back empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    id: String,
    kind: AttachmentKind,
    filename: String,
    local_path: PathBuf,
}

impl Attachment {
    /// Create an image attachment pointing at an already-stored file
    pub fn image(filename: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: AttachmentKind::Image,
            filename: filename.into(),
            local_path,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// One utterance in a conversation, tagged user or assistant.
/// Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: String,
    content: String,
    timestamp: i64,
    is_user: bool,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Create a user message. Content is trimmed of surrounding whitespace.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into().trim().to_string(),
            timestamp: unix_now(),
            is_user: true,
            attachments,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into().trim().to_string(),
            timestamp: unix_now(),
            is_user: false,
            attachments: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

/// Point-in-time shape of a project, captured before a send operation so a
/// failed operation can restore the exact pre-operation state.
#[derive(Debug, Clone, Copy)]
pub struct ProjectSnapshot {
    message_count: usize,
    updated_at: i64,
}

/// One repair-advice conversation thread with a title and message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
    messages: Vec<Message>,
}

impl Project {
    /// Create an empty project with the given title
    pub fn new(title: impl Into<String>) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Append a message and bump `updated_at`.
    /// `updated_at` never moves backwards, even if the clock does.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = self.updated_at.max(unix_now());
    }

    #[cfg(test)]
    pub(crate) fn set_updated_at(&mut self, updated_at: i64) {
        self.updated_at = updated_at;
    }

    /// Capture the current shape for a later rollback
    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            message_count: self.messages.len(),
            updated_at: self.updated_at,
        }
    }

    /// Restore the shape captured by `snapshot`, dropping any messages
    /// appended since
    pub fn restore(&mut self, snapshot: ProjectSnapshot) {
        self.messages.truncate(snapshot.message_count);
        self.updated_at = snapshot.updated_at;
    }
}

// Identity is the id; title and history don't participate in equality.
impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Project {}

impl std::hash::Hash for Project {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
