// Classifier Boundary
// The external classification capability the moderation pipeline consumes.

use crate::models::{ClassificationVerdict, MisinformationJudgment};
use async_trait::async_trait;
use thiserror::Error;

/// Failure taxonomy of a classifier call.
///
/// Retry decisions use [`ClassifierError::is_transient`]; message text is
/// never inspected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("classification failed: {0}")]
    Permanent(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("API key not configured")]
    MissingApiKey,
}

impl ClassifierError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClassifierError::RateLimited(_))
    }
}

/// One configured handle to the classification service, shared read-only by
/// every worker of a run.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a text span for policy-violating content.
    async fn classify(&self, text: &str) -> Result<ClassificationVerdict, ClassifierError>;

    /// Judge a text span for factual misinformation.
    async fn analyze_misinformation(
        &self,
        text: &str,
    ) -> Result<MisinformationJudgment, ClassifierError>;
}
