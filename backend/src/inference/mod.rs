pub mod caption;
pub mod classifier;
pub mod preprocess;
pub mod report;
pub mod sampling;

use dermai_shared::LabelCode;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SKIN_MODEL_NAME: &str = "NeuronZero/SkinCancerClassifier";
pub const CAPTION_MODEL_NAME: &str = "Salesforce/blip2-opt-2.7b";
pub const CHAT_MODEL_NAME: &str = "llama3.2";

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("invalid model config: {0}")]
    ModelConfig(String),
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
    #[error("model handle is unavailable after a failed forward pass")]
    Poisoned,
    #[error("model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("chat request failed: {0}")]
    Chat(#[from] reqwest::Error),
    #[error("unexpected chat response: {0}")]
    ChatResponse(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("cancelled")]
    Cancelled,
}

impl From<crate::ingest::IngestError> for InferenceError {
    fn from(err: crate::ingest::IngestError) -> Self {
        InferenceError::Preprocessing(err.to_string())
    }
}

/// Shared flag a request raises to stop work it no longer waits for.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raises the flag when dropped, so abandoned requests stop their blocking jobs.
#[derive(Debug)]
pub struct CancelOnDrop(pub Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Top-1 output of the lesion classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub code: LabelCode,
    pub confidence: f32,
}

pub trait LesionClassifier: Send + Sync {
    fn classify(&self, image: &Path) -> Result<Classification, InferenceError>;
}

pub trait CaptionGenerator: Send + Sync {
    /// Generation stops with `InferenceError::Cancelled` once `cancel` is raised.
    fn caption(&self, image: &Path, cancel: &Cancellation) -> Result<String, InferenceError>;
}

/// Single-turn chat completion against a language model.
pub trait ChatModel: Send + Sync {
    fn chat(&self, prompt: String) -> BoxFuture<'_, Result<String, InferenceError>>;
}
