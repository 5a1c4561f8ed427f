// Transcript Guard Core Services

pub mod classifier;
pub mod config_store;
pub mod moderation;
pub mod providers;
pub mod text_processor;

pub use classifier::{Classifier, ClassifierError};
pub use config_store::*;
pub use providers::{get_api_key, OpenAiClassifier};
pub use text_processor::*;

pub use moderation::{
    build_report,
    split,
    split_with_strategy,
    ChunkOutcome,
    ChunkStrategy,
    Dispatcher,
    ModerationError,
    ReportAggregator,
    RetryPolicy,
    TranscriptModerator,
};
