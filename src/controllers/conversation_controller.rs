use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Attachment, Message, Project};
use crate::repositories::{ProjectRepository, RepositoryError};
use crate::services::attachment_store::{AttachmentStore, AttachmentStoreError};
use crate::services::completion::{CompletionError, CompletionService, ImageInput};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Failed to get a response: {0}")]
    Completion(#[from] CompletionError),

    #[error("Failed to save project: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Failed to store attachment: {0}")]
    Attachment(#[from] AttachmentStoreError),
}

/// Result of a send operation that did not fail
#[derive(Debug)]
pub enum SendOutcome {
    /// Both the user turn and the assistant reply are in memory and persisted
    Sent { reply: String },
    /// The input was empty or a duplicate of the last message; nothing changed
    Ignored,
}

/// Orchestrates sending one message: mutates the in-memory project, persists
/// it, calls the completion service, and rolls everything back on failure.
///
/// Callers must not run two sends against the same project concurrently;
/// this controller does not serialize them.
pub struct ConversationController {
    repository: Arc<dyn ProjectRepository>,
    completion: Arc<dyn CompletionService>,
    attachments: Arc<AttachmentStore>,
}

impl ConversationController {
    pub fn new(
        repository: Arc<dyn ProjectRepository>,
        completion: Arc<dyn CompletionService>,
        attachments: Arc<AttachmentStore>,
    ) -> Self {
        Self {
            repository,
            completion,
            attachments,
        }
    }

    /// Send a user message and append the assistant's reply.
    ///
    /// The operation is all-or-nothing from the caller's perspective: on any
    /// failure the project is restored to its exact pre-call shape before the
    /// error is surfaced. Empty input (after trimming, with no images) and
    /// input identical to the last message are silently ignored.
    pub async fn send_message(
        &self,
        project: &mut Project,
        text: &str,
        images: Vec<ImageInput>,
    ) -> Result<SendOutcome, SendError> {
        let text = text.trim();

        if text.is_empty() && images.is_empty() {
            debug!("Ignoring empty send");
            return Ok(SendOutcome::Ignored);
        }

        // Best-effort duplicate-send guard; false positives are possible if
        // the user legitimately repeats themselves.
        if project.last_message().is_some_and(|m| m.content() == text) {
            debug!(project_id = %project.id(), "Ignoring duplicate send");
            return Ok(SendOutcome::Ignored);
        }

        let snapshot = project.snapshot();

        // Commit attachment binaries before constructing the message that
        // references them
        let mut attachments = Vec::with_capacity(images.len());
        for image in &images {
            let path = self.attachments.store(&image.bytes).await?;
            attachments.push(Attachment::image(image.filename.clone(), path));
        }

        project.push_message(Message::user(text, attachments));

        if let Err(e) = self.repository.save(project).await {
            project.restore(snapshot);
            return Err(SendError::Persistence(e));
        }

        let context = project.messages().to_vec();
        let reply = match self
            .completion
            .complete(context, text.to_string(), images)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                project.restore(snapshot);
                self.compensating_save(project).await;
                return Err(SendError::Completion(e));
            }
        };

        project.push_message(Message::assistant(reply.clone()));

        if let Err(e) = self.repository.save(project).await {
            // Both the assistant turn and the user turn come back out
            project.restore(snapshot);
            self.compensating_save(project).await;
            return Err(SendError::Persistence(e));
        }

        Ok(SendOutcome::Sent { reply })
    }

    /// Persist a rolled-back project. Failure here is logged and swallowed;
    /// the original error is what the caller needs to see.
    async fn compensating_save(&self, project: &Project) {
        if let Err(e) = self.repository.save(project).await {
            warn!(
                project_id = %project.id(),
                error = %e,
                "Compensating save failed after rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{BoxFuture, InMemoryProjectRepository};

    /// Completion service with a canned outcome
    struct FixedCompletion(Result<String, ()>);

    impl FixedCompletion {
        fn reply(text: &str) -> Self {
            Self(Ok(text.to_string()))
        }

        fn failing() -> Self {
            Self(Err(()))
        }
    }

    impl CompletionService for FixedCompletion {
        fn complete(
            &self,
            _context: Vec<Message>,
            _text: String,
            _images: Vec<ImageInput>,
        ) -> BoxFuture<'static, Result<String, CompletionError>> {
            let outcome = self
                .0
                .clone()
                .map_err(|_| CompletionError::Transport("connection refused".to_string()));
            Box::pin(async move { outcome })
        }
    }

    fn controller(
        repo: &InMemoryProjectRepository,
        completion: FixedCompletion,
    ) -> (ConversationController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let controller = ConversationController::new(
            Arc::new(repo.clone()),
            Arc::new(completion),
            Arc::new(AttachmentStore::new(dir.path().to_path_buf())),
        );
        (controller, dir)
    }

    fn project_with_history() -> Project {
        let mut project = Project::new("Leaky faucet");
        project.push_message(Message::user("The faucet drips overnight", Vec::new()));
        project.push_message(Message::assistant("Check the washer first."));
        project
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 120, 10]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut out),
                image::ImageFormat::Png,
            )
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let repo = InMemoryProjectRepository::new();
        let (controller, _dir) = controller(&repo, FixedCompletion::reply("hi"));
        let mut project = project_with_history();

        let outcome = controller
            .send_message(&mut project, "   \n  ", Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Ignored));
        assert_eq!(project.message_count(), 2);
        assert_eq!(repo.save_attempts(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_send_is_noop() {
        let repo = InMemoryProjectRepository::new();
        let (controller, _dir) = controller(&repo, FixedCompletion::reply("hi"));
        let mut project = project_with_history();
        project.push_message(Message::user("Is it the washer?", Vec::new()));

        let outcome = controller
            .send_message(&mut project, "Is it the washer?", Vec::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Ignored));
        assert_eq!(project.message_count(), 3);
        assert_eq!(repo.save_attempts(), 0);
    }

    #[tokio::test]
    async fn test_successful_send_appends_two_messages() {
        let repo = InMemoryProjectRepository::new();
        let (controller, _dir) =
            controller(&repo, FixedCompletion::reply("Replace the cartridge."));
        let mut project = project_with_history();
        let before = project.updated_at();

        let outcome = controller
            .send_message(&mut project, "The washer looks fine", Vec::new())
            .await
            .unwrap();

        match outcome {
            SendOutcome::Sent { reply } => assert_eq!(reply, "Replace the cartridge."),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(project.message_count(), 4);
        assert!(project.messages()[2].is_user());
        assert_eq!(project.messages()[2].content(), "The washer looks fine");
        assert!(!project.messages()[3].is_user());
        assert!(project.updated_at() >= before);
        // Post-user save and post-assistant save
        assert_eq!(repo.save_attempts(), 2);
    }

    #[tokio::test]
    async fn test_send_with_image_builds_attachment() {
        let repo = InMemoryProjectRepository::new();
        let (controller, _dir) = controller(&repo, FixedCompletion::reply("Looks corroded."));
        let mut project = Project::new("Water heater");

        let images = vec![ImageInput::new("valve.png", png_bytes())];
        controller
            .send_message(&mut project, "What is this part?", images)
            .await
            .unwrap();

        let user_message = &project.messages()[0];
        assert_eq!(user_message.attachments().len(), 1);
        assert_eq!(user_message.attachments()[0].filename(), "valve.png");
        assert!(user_message.attachments()[0].local_path().exists());
    }

    #[tokio::test]
    async fn test_post_user_save_failure_rolls_back() {
        let repo = InMemoryProjectRepository::new();
        repo.fail_next_saves(1);
        let (controller, _dir) = controller(&repo, FixedCompletion::reply("hi"));
        let mut project = project_with_history();
        let stamp = project.updated_at();

        let err = controller
            .send_message(&mut project, "Still dripping", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Persistence(_)));
        assert_eq!(project.message_count(), 2);
        assert_eq!(project.updated_at(), stamp);
        // Exactly one attempted save, no compensation (nothing was persisted)
        assert_eq!(repo.save_attempts(), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_rolls_back_and_compensates() {
        let repo = InMemoryProjectRepository::new();
        let (controller, _dir) = controller(&repo, FixedCompletion::failing());
        let mut project = project_with_history();
        let stamp = project.updated_at();

        let err = controller
            .send_message(&mut project, "Still dripping", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Completion(_)));
        assert_eq!(project.message_count(), 2);
        assert_eq!(project.updated_at(), stamp);
        // Post-user save plus the compensating save of the rollback
        assert_eq!(repo.save_attempts(), 2);

        // The durable copy matches the rolled-back in-memory state
        let persisted = repo.load_all().await.unwrap();
        assert_eq!(persisted[0].message_count(), 2);
    }

    /// Completion that arms repository save failures right before the
    /// controller performs its next save
    struct ArmingCompletion {
        repo: InMemoryProjectRepository,
        arm_failures: usize,
        outcome: Result<String, ()>,
    }

    impl CompletionService for ArmingCompletion {
        fn complete(
            &self,
            _context: Vec<Message>,
            _text: String,
            _images: Vec<ImageInput>,
        ) -> BoxFuture<'static, Result<String, CompletionError>> {
            self.repo.fail_next_saves(self.arm_failures);
            let outcome = self
                .outcome
                .clone()
                .map_err(|_| CompletionError::Transport("connection refused".to_string()));
            Box::pin(async move { outcome })
        }
    }

    #[tokio::test]
    async fn test_post_assistant_save_failure_rolls_back_both() {
        let repo = InMemoryProjectRepository::new();
        let mut project = project_with_history();
        let stamp = project.updated_at();

        let dir = tempfile::tempdir().unwrap();
        let controller = ConversationController::new(
            Arc::new(repo.clone()),
            Arc::new(ArmingCompletion {
                repo: repo.clone(),
                arm_failures: 1,
                outcome: Ok("hi".to_string()),
            }),
            Arc::new(AttachmentStore::new(dir.path().to_path_buf())),
        );

        let err = controller
            .send_message(&mut project, "Still dripping", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Persistence(_)));
        assert_eq!(project.message_count(), 2);
        assert_eq!(project.updated_at(), stamp);
        // Post-user save, failed post-assistant save, compensating save
        assert_eq!(repo.save_attempts(), 3);

        let persisted = repo.load_all().await.unwrap();
        assert_eq!(persisted[0].message_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_compensating_save_is_not_escalated() {
        let repo = InMemoryProjectRepository::new();
        let mut project = project_with_history();
        let stamp = project.updated_at();

        // Post-user save succeeds; the completion then fails and arms the
        // repository so the compensating save fails too
        let dir = tempfile::tempdir().unwrap();
        let controller = ConversationController::new(
            Arc::new(repo.clone()),
            Arc::new(ArmingCompletion {
                repo: repo.clone(),
                arm_failures: 1,
                outcome: Err(()),
            }),
            Arc::new(AttachmentStore::new(dir.path().to_path_buf())),
        );

        let err = controller
            .send_message(&mut project, "Still dripping", Vec::new())
            .await
            .unwrap_err();

        // The completion failure is what surfaces, not the swallowed
        // compensating-save failure
        assert!(matches!(err, SendError::Completion(_)));
        assert_eq!(project.message_count(), 2);
        assert_eq!(project.updated_at(), stamp);
        // Post-user save plus the failed compensating save
        assert_eq!(repo.save_attempts(), 2);
    }
}
