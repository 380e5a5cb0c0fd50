//! Generation pipeline: research, quality-gated drafting, image, render,
//! rebuild, publish.
//!
//! Every step runs strictly after the previous one. The quality gate is
//! advisory: when no attempt passes, the last draft is rendered anyway.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Topic};
use crate::error::{PipelineError, error_chain};
use crate::llm::{ImageGenerator, TextGenerator};
use crate::pipeline::prompts::{
    self, ARTICLE_SYSTEM, Draft, QUALITY_SYSTEM, QualityVerdict, RESEARCH_SYSTEM,
};
use crate::publish::Publisher;
use crate::site::Site;

/// Draft attempts for command- and timer-driven runs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Draft attempts for batch runs.
pub const BATCH_MAX_ATTEMPTS: u32 = 3;

/// Minimum passing quality score.
pub const PASS_THRESHOLD: u8 = 7;

/// Tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub pass_threshold: u8,
    /// Pause between consecutive external calls.
    pub step_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pass_threshold: PASS_THRESHOLD,
            step_delay: Duration::from_secs(1),
        }
    }
}

impl PipelineSettings {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// State of one generation or rework run. Discarded once the outcome is built.
#[derive(Debug)]
pub struct GenerationAttempt<'a> {
    pub topic: &'a Topic,
    /// Feedback for the next draft; replaced by each failing verdict.
    pub feedback: String,
    /// Score of the most recent draft.
    pub score: Option<u8>,
    /// Drafts produced so far.
    pub attempt: u32,
}

impl<'a> GenerationAttempt<'a> {
    pub fn new(topic: &'a Topic, feedback_seed: &str) -> Self {
        Self {
            topic,
            feedback: feedback_seed.trim().to_string(),
            score: None,
            attempt: 0,
        }
    }

    /// Fold a verdict in. Returns `true` when the loop should stop.
    fn record(&mut self, verdict: QualityVerdict, threshold: u8, max_attempts: u32) -> bool {
        self.score = Some(verdict.score);
        if verdict.passed(threshold) || self.attempt >= max_attempts {
            return true;
        }
        self.feedback = verdict.feedback;
        false
    }
}

/// Result of a pipeline run, whatever the gate and publish outcome.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub slug: String,
    pub title: String,
    pub score: u8,
    pub passed: bool,
    pub attempts: u32,
    /// Hero image file name, if one was produced.
    pub image: Option<String>,
    pub artifact_path: PathBuf,
    pub url: String,
    /// Whether the publish step succeeded.
    pub published: bool,
}

/// The generation pipeline and its collaborators.
pub struct GenerationPipeline {
    writer: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    publisher: Arc<dyn Publisher>,
    site: Site,
    settings: PipelineSettings,
}

impl GenerationPipeline {
    pub fn new(
        writer: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        publisher: Arc<dyn Publisher>,
        site: Site,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            writer,
            images,
            publisher,
            site,
            settings,
        }
    }

    /// Same collaborators, different settings.
    pub fn with_settings(&self, settings: PipelineSettings) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            images: Arc::clone(&self.images),
            publisher: Arc::clone(&self.publisher),
            site: self.site.clone(),
            settings,
        }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Generate (empty `feedback_seed`) or rework `topic` and publish it with
    /// `commit_message`.
    pub async fn generate(
        &self,
        topic: &Topic,
        catalog: &Catalog,
        feedback_seed: &str,
        commit_message: &str,
    ) -> Result<GenerationOutcome, PipelineError> {
        let slug = topic.slug.as_str();
        info!(slug, rework = !feedback_seed.trim().is_empty(), "Generation started");

        // 1. Research
        let research = self
            .writer
            .complete(&prompts::research_prompt(topic), RESEARCH_SYSTEM)
            .await
            .map_err(|source| PipelineError::Research {
                slug: slug.to_string(),
                source,
            })?;
        debug!(slug, chars = research.len(), "Research notes ready");
        self.pause().await;

        // 2. Quality-gated draft loop
        let mut attempt = GenerationAttempt::new(topic, feedback_seed);
        let draft = loop {
            attempt.attempt += 1;
            let draft = self.draft(&attempt, &research).await?;
            self.pause().await;

            let verdict = self.check_quality(topic, &draft).await?;
            info!(
                slug,
                attempt = attempt.attempt,
                score = verdict.score,
                passed = verdict.passed(self.settings.pass_threshold),
                "Quality verdict"
            );
            if attempt.record(verdict, self.settings.pass_threshold, self.settings.max_attempts) {
                break draft;
            }
            info!(slug, "Regenerating with feedback");
            self.pause().await;
        };
        let score = attempt.score.unwrap_or(prompts::DEFAULT_SCORE);
        let passed = score >= self.settings.pass_threshold;
        if !passed {
            warn!(slug, score, attempts = attempt.attempt, "Quality gate not met, rendering last draft");
        }

        // 3. Image (best effort)
        let image = self.image(topic).await;

        // 4. Render
        let before = self.site.published()?;
        let artifact_path = self
            .site
            .render_article(topic, &draft, image.as_deref(), catalog, &before)?;

        // 5. Rebuild
        let after = self.site.published()?;
        self.site.rebuild(catalog, &after)?;

        // 6. Publish (failure is logged, never propagated)
        let published = match self.publisher.publish(commit_message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(slug, error = %error_chain(&e), "Publish failed");
                false
            }
        };

        info!(slug, score, image = image.is_some(), published, "Generation finished");
        Ok(GenerationOutcome {
            slug: topic.slug.clone(),
            title: topic.title.clone(),
            score,
            passed,
            attempts: attempt.attempt,
            image,
            artifact_path,
            url: catalog.article_url(&topic.slug),
            published,
        })
    }

    async fn draft(&self, attempt: &GenerationAttempt<'_>, research: &str) -> Result<Draft, PipelineError> {
        let topic = attempt.topic;
        debug!(slug = %topic.slug, attempt = attempt.attempt, "Drafting");
        let raw = self
            .writer
            .complete(
                &prompts::article_prompt(topic, research, &attempt.feedback),
                ARTICLE_SYSTEM,
            )
            .await
            .map_err(|source| PipelineError::Draft {
                slug: topic.slug.clone(),
                attempt: attempt.attempt,
                source,
            })?;
        Ok(prompts::parse_draft(&raw, topic))
    }

    async fn check_quality(&self, topic: &Topic, draft: &Draft) -> Result<QualityVerdict, PipelineError> {
        let raw = self
            .writer
            .complete(
                &prompts::quality_prompt(topic, &draft.content_html),
                QUALITY_SYSTEM,
            )
            .await
            .map_err(|source| PipelineError::QualityCheck {
                slug: topic.slug.clone(),
                source,
            })?;
        Ok(prompts::parse_quality(&raw))
    }

    async fn image(&self, topic: &Topic) -> Option<String> {
        let bytes = self.images.generate_image(topic).await?;
        self.pause().await;
        match self.site.write_image(&topic.slug, &bytes) {
            Ok(file_name) => Some(file_name),
            Err(e) => {
                warn!(slug = %topic.slug, error = %error_chain(&e), "Failed to store image");
                None
            }
        }
    }

    async fn pause(&self) {
        if !self.settings.step_delay.is_zero() {
            tokio::time::sleep(self.settings.step_delay).await;
        }
    }
}
