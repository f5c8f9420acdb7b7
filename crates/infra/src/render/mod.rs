//! Content renderers: pure functions from a size parameter to bytes.
//!
//! Renderers are synchronous and CPU-bound; the worker runs them on the
//! blocking pool. Long renders report intermediate progress through a
//! [`ProgressReporter`].

pub mod raster;
pub mod text;

use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

/// Highest progress a renderer may report; the worker owns everything above.
pub const RENDER_PROGRESS_CEILING: u8 = 94;

/// Large books report progress every this many lines.
pub const LINES_PER_PROGRESS_STEP: usize = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("invalid render request: {0}")]
    InvalidRequest(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("renderer failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRequest {
    pub title: String,
    pub author: String,
    /// `None` picks a random length (300..=800 words).
    pub word_count: Option<u32>,
    pub generated_on: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRequest {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            width: raster::DEFAULT_WIDTH,
            height: raster::DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub message: String,
}

/// Forwards monotonically increasing progress out of a blocking render.
///
/// Values above [`RENDER_PROGRESS_CEILING`] are clamped; values not above the
/// last forwarded one are dropped.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last: AtomicU8,
}

impl ProgressReporter {
    /// Reporter starting at `floor`, plus the receiving half for the worker.
    pub fn channel(floor: u8) -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                last: AtomicU8::new(floor),
            },
            rx,
        )
    }

    pub fn noop() -> Self {
        Self {
            tx: None,
            last: AtomicU8::new(0),
        }
    }

    /// Returns whether the update was forwarded.
    pub fn report(&self, progress: u8, message: impl Into<String>) -> bool {
        let progress = progress.min(RENDER_PROGRESS_CEILING);
        if self.last.fetch_max(progress, Ordering::SeqCst) >= progress {
            return false;
        }
        match &self.tx {
            Some(tx) => tx
                .send(ProgressUpdate {
                    progress,
                    message: message.into(),
                })
                .is_ok(),
            None => true,
        }
    }

    pub fn last(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

pub trait Renderer: Send + Sync + 'static {
    fn render_book(&self, request: &BookRequest) -> Result<Vec<u8>, RenderError>;

    fn render_large_book(
        &self,
        request: &BookRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<u8>, RenderError>;

    fn render_image(&self, request: &ImageRequest) -> Result<Vec<u8>, RenderError>;
}

/// Plain-text books and PNG images from thread-local randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRenderer;

impl StandardRenderer {
    fn compose(request: &BookRequest, lines: &[String]) -> Vec<u8> {
        let mut out = text::header(&request.title, &request.author, &request.generated_on);
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.into_bytes()
    }
}

impl Renderer for StandardRenderer {
    fn render_book(&self, request: &BookRequest) -> Result<Vec<u8>, RenderError> {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let words = request
            .word_count
            .unwrap_or_else(|| rng.gen_range(300..=800));
        let content = text::generate_content(&mut rng, words);
        Ok(Self::compose(request, &text::wrap(&content, text::LINE_WIDTH)))
    }

    fn render_large_book(
        &self,
        request: &BookRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<u8>, RenderError> {
        let words = request
            .word_count
            .filter(|w| *w > 0)
            .ok_or_else(|| RenderError::InvalidRequest("large book needs a word count".into()))?;

        let content = text::generate_content(&mut rand::thread_rng(), words);
        let lines = text::wrap(&content, text::LINE_WIDTH);
        let total = lines.len().max(1);
        progress.report(30, format!("Typesetting {} ({} lines)", request.title, lines.len()));

        let mut typeset = Vec::with_capacity(lines.len());
        for (done, line) in lines.into_iter().enumerate() {
            typeset.push(line);
            if done > 0 && done % LINES_PER_PROGRESS_STEP == 0 {
                let pct = 30 + (done * 60 / total) as u8;
                progress.report(pct, format!("Typesetting {}: line {done}/{total}", request.title));
            }
        }

        progress.report(90, format!("{} typeset", request.title));
        Ok(Self::compose(request, &typeset))
    }

    fn render_image(&self, request: &ImageRequest) -> Result<Vec<u8>, RenderError> {
        raster::render_png(&mut rand::thread_rng(), request.width, request.height)
    }
}
