//! Per-kind execution: render, persist, report progress.

use std::sync::Arc;

use bookforge_core::{JobEnvelope, JobSpec, StatusRecord, TaskId};
use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::blob::{BlobError, BlobMetadata, BlobStore, PutObject};
use crate::render::{BookRequest, ImageRequest, ProgressReporter, RenderError, Renderer};
use crate::status::StatusTracker;

pub const AUTHOR: &str = "GPN";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const PNG_CONTENT_TYPE: &str = "image/png";

const BOOK_PREFIX: &str = "book_";
const LARGE_BOOK_PREFIX: &str = "large_book_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("storage failed: {0}")]
    Storage(#[from] BlobError),

    #[error("renderer task aborted: {0}")]
    Aborted(String),
}

pub fn book_key(task_id: TaskId, index: u32) -> String {
    format!("{BOOK_PREFIX}{}_{index}.txt", task_id.simple())
}

pub fn large_book_key(task_id: TaskId) -> String {
    format!("{LARGE_BOOK_PREFIX}{}.txt", task_id.simple())
}

pub fn image_key(task_id: TaskId, index: u32) -> String {
    format!("image_{}_{index}.png", task_id.simple())
}

/// Runs one envelope to completion.
///
/// Blob keys derive from the task id alone, so running the same envelope
/// twice overwrites rather than duplicates.
#[derive(Clone)]
pub struct JobDispatcher {
    tracker: StatusTracker,
    blobs: Arc<dyn BlobStore>,
    renderer: Arc<dyn Renderer>,
}

impl JobDispatcher {
    pub fn new(
        tracker: StatusTracker,
        blobs: Arc<dyn BlobStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            tracker,
            blobs,
            renderer,
        }
    }

    /// Execute and return the completion message.
    pub async fn execute(&self, envelope: &JobEnvelope) -> Result<String, JobError> {
        match envelope.spec() {
            JobSpec::Book { count } => self.books(envelope, *count).await,
            JobSpec::LargeBook {
                book_number,
                word_count,
            } => self.large_book(envelope, *book_number, *word_count).await,
            JobSpec::Image { count } => self.images(envelope, *count).await,
        }
    }

    async fn render<F>(&self, job: F) -> Result<Vec<u8>, JobError>
    where
        F: FnOnce(&dyn Renderer) -> Result<Vec<u8>, RenderError> + Send + 'static,
    {
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || job(renderer.as_ref()))
            .await
            .map_err(|e| JobError::Aborted(e.to_string()))?
            .map_err(JobError::from)
    }

    /// Ordinal for the next book: generated books in the store not written by
    /// this task, plus one.
    async fn next_book_number(&self, task_id: TaskId) -> Result<u32, JobError> {
        let own = task_id.simple();
        let mut existing = 0u32;
        for prefix in [BOOK_PREFIX, LARGE_BOOK_PREFIX] {
            existing += self
                .blobs
                .list(prefix)
                .await?
                .iter()
                .filter(|head| !head.key.contains(&own))
                .count() as u32;
        }
        Ok(existing + 1)
    }

    async fn books(&self, envelope: &JobEnvelope, count: u32) -> Result<String, JobError> {
        let task_id = envelope.task_id();
        let count = count.max(1);
        let first_number = self.next_book_number(task_id).await?;
        let generated_on = Utc::now().format("%Y-%m-%d").to_string();

        for i in 0..count {
            let progress = 10 + (i * 80 / count) as u8;
            self.tracker
                .record(
                    task_id,
                    StatusRecord::processing(format!("Generating book {}/{count}", i + 1), progress),
                )
                .await;

            let number = first_number + i;
            let request = BookRequest {
                title: format!("Generated Book {number}"),
                author: AUTHOR.to_string(),
                word_count: None,
                generated_on: generated_on.clone(),
            };
            let metadata = book_metadata(envelope, &request.title, number, None)?;
            let body = self.render(move |r| r.render_book(&request)).await?;

            let key = book_key(task_id, i);
            self.blobs
                .put(PutObject::new(&key, body, TEXT_CONTENT_TYPE).with_metadata(metadata))
                .await?;
            debug!(task_id = %task_id, key = %key, "book stored");
        }

        Ok(format!("Generated {count} books"))
    }

    async fn large_book(
        &self,
        envelope: &JobEnvelope,
        book_number: u32,
        word_count: u32,
    ) -> Result<String, JobError> {
        let task_id = envelope.task_id();
        self.tracker
            .record(
                task_id,
                StatusRecord::processing(
                    format!("Generating large book {book_number} with {word_count} words"),
                    15,
                ),
            )
            .await;

        let request = BookRequest {
            title: format!("Large Book {book_number}"),
            author: AUTHOR.to_string(),
            word_count: Some(word_count),
            generated_on: Utc::now().format("%Y-%m-%d").to_string(),
        };
        let metadata = book_metadata(envelope, &request.title, book_number, Some(word_count))?;

        let (reporter, mut updates) = ProgressReporter::channel(15);
        let render = self.render(move |r| r.render_large_book(&request, &reporter));
        let tracker = self.tracker.clone();
        let pump = async move {
            while let Some(update) = updates.recv().await {
                tracker
                    .record(task_id, StatusRecord::processing(update.message, update.progress))
                    .await;
            }
        };
        let (body, ()) = tokio::join!(render, pump);
        let body = body?;

        self.tracker
            .record(
                task_id,
                StatusRecord::processing(format!("Uploading large book {book_number}"), 95),
            )
            .await;
        self.blobs
            .put(
                PutObject::new(large_book_key(task_id), body, TEXT_CONTENT_TYPE)
                    .with_metadata(metadata),
            )
            .await?;

        Ok(format!(
            "Large book {book_number} generated with {word_count} words"
        ))
    }

    async fn images(&self, envelope: &JobEnvelope, count: u32) -> Result<String, JobError> {
        let task_id = envelope.task_id();
        let count = count.max(1);

        for i in 0..count {
            let progress = 10 + (i * 90 / count) as u8;
            self.tracker
                .record(
                    task_id,
                    StatusRecord::processing(format!("Generating image {}/{count}", i + 1), progress),
                )
                .await;

            let request = ImageRequest::default();
            let body = self.render(move |r| r.render_image(&request)).await?;

            let mut metadata = BlobMetadata::new();
            metadata.insert("title", format!("Generated Image {}", i + 1))?;
            metadata.insert("description", "Random abstract image")?;
            metadata.insert("generated", "true")?;
            metadata.insert("timestamp", Utc::now().to_rfc3339())?;
            metadata.insert("width", request.width.to_string())?;
            metadata.insert("height", request.height.to_string())?;
            metadata.insert("task_id", task_id.to_string())?;

            self.blobs
                .put(PutObject::new(image_key(task_id, i), body, PNG_CONTENT_TYPE).with_metadata(metadata))
                .await?;
        }

        Ok(format!("Generated {count} images"))
    }
}

/// ASCII-only metadata; non-ASCII titles and principals are left out.
fn book_metadata(
    envelope: &JobEnvelope,
    title: &str,
    book_number: u32,
    word_count: Option<u32>,
) -> Result<BlobMetadata, BlobError> {
    let mut metadata = BlobMetadata::new();
    metadata.insert_if_ascii("title", title);
    metadata.insert("author", AUTHOR)?;
    metadata.insert("description", "Book with random English content")?;
    metadata.insert("generated", "true")?;
    metadata.insert("timestamp", Utc::now().to_rfc3339())?;
    metadata.insert("language", "en")?;
    metadata.insert("book_number", book_number.to_string())?;
    metadata.insert("task_id", envelope.task_id().to_string())?;
    if let Some(words) = word_count {
        metadata.insert("word_count", words.to_string())?;
        metadata.insert_if_ascii("user_id", envelope.submitted_by().as_str());
    }
    Ok(metadata)
}
