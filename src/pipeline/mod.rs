//! Article generation.
//!
//! 1. Research notes for the topic
//! 2. Draft + independent quality check, retried with the critique as feedback
//! 3. Hero image (best effort)
//! 4. Render the article page
//! 5. Rebuild index, sitemap and robots listing
//! 6. Commit and push
//!
//! The quality gate never withholds publication.

pub mod generation;
pub mod prompts;

pub use generation::{
    BATCH_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS, GenerationAttempt, GenerationOutcome,
    GenerationPipeline, PASS_THRESHOLD, PipelineSettings,
};
pub use prompts::{Draft, HowToStep, QualityVerdict};
