//! Turning user utterances into facts and profile updates.
//!
//! Two strategies share one trait: a deterministic fast path and a
//! model-backed extractor. [`ExtractionPipeline`] composes them with fixed
//! precedence: deterministic results are committed first, model results are
//! applied afterwards and skipped when the model call fails.

pub mod fast_path;
pub mod generative;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::memory::{ProfileField, ProfileStore, ProfileUpdate, UserProfile, render};

pub use fast_path::{FastPathExtractor, NameDetection, try_extract_name};
pub use generative::GenerativeExtractor;

/// A way of reading facts and profile updates out of an utterance.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// New durable facts in `utterance`. `context` is the rendered memory.
    async fn extract_facts(
        &self,
        utterance: &str,
        profile: &UserProfile,
        context: &str,
    ) -> anyhow::Result<Vec<String>>;

    /// Scalar profile changes implied by `utterance` and the facts found in it.
    async fn extract_profile_updates(
        &self,
        utterance: &str,
        facts: &[String],
        profile: &UserProfile,
    ) -> anyhow::Result<ProfileUpdate>;
}

/// What extraction recorded for one turn.
#[derive(Debug, Default, Clone)]
pub struct TurnExtraction {
    /// Every fact appended to the store this turn, in order.
    pub facts: Vec<String>,
    /// Profile fields that changed.
    pub changed: Vec<ProfileField>,
}

pub struct ExtractionPipeline {
    deterministic: Box<dyn ExtractionStrategy>,
    generative: Box<dyn ExtractionStrategy>,
    recent_facts: usize,
}

impl ExtractionPipeline {
    pub fn new(
        deterministic: Box<dyn ExtractionStrategy>,
        generative: Box<dyn ExtractionStrategy>,
        recent_facts: usize,
    ) -> Self {
        Self {
            deterministic,
            generative,
            recent_facts,
        }
    }

    /// Fact phase: fast path, then model facts, then append everything.
    ///
    /// Only store writes fail this phase; model errors yield no facts.
    pub async fn extract(
        &self,
        utterance: &str,
        store: &mut ProfileStore,
    ) -> anyhow::Result<TurnExtraction> {
        let fast_facts = self
            .deterministic
            .extract_facts(utterance, store.profile(), "")
            .await?;
        let fast_updates = self
            .deterministic
            .extract_profile_updates(utterance, &fast_facts, store.profile())
            .await?;
        let changed = store.apply_updates(&fast_updates)?;
        let seed = if changed.contains(&ProfileField::Name) {
            fast_facts
        } else {
            Vec::new()
        };
        if !changed.is_empty() {
            debug!(?changed, "fast path updated profile");
        }

        let context = render(store.snapshot(), self.recent_facts);
        let mut facts = match self
            .generative
            .extract_facts(utterance, store.profile(), &context)
            .await
        {
            Ok(facts) => facts,
            Err(e) => {
                warn!("fact extraction failed: {e}");
                Vec::new()
            }
        };

        if !facts.iter().any(|f| fast_path::mentions_name(f)) {
            facts.extend(seed);
        }

        for fact in &facts {
            store.add_fact(fact, None)?;
        }
        if !facts.is_empty() {
            debug!(count = facts.len(), "recorded facts");
        }

        Ok(TurnExtraction { facts, changed })
    }

    /// Merge phase: ask the model for scalar updates implied by `facts`.
    ///
    /// Skipped when there are no facts. Model errors leave the profile as is.
    pub async fn merge(
        &self,
        utterance: &str,
        facts: &[String],
        store: &mut ProfileStore,
    ) -> anyhow::Result<Vec<ProfileField>> {
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        let updates = match self
            .generative
            .extract_profile_updates(utterance, facts, store.profile())
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!("profile update extraction failed: {e}");
                ProfileUpdate::new()
            }
        };
        let changed = store.apply_updates(&updates)?;
        if !changed.is_empty() {
            debug!(?changed, "merged profile updates");
        }
        Ok(changed)
    }

    /// Both phases back to back.
    pub async fn run(
        &self,
        utterance: &str,
        store: &mut ProfileStore,
    ) -> anyhow::Result<TurnExtraction> {
        let extracted = self.extract(utterance, store).await?;
        let mut changed = extracted.changed;
        for field in self.merge(utterance, &extracted.facts, store).await? {
            if !changed.contains(&field) {
                changed.push(field);
            }
        }
        Ok(TurnExtraction {
            facts: extracted.facts,
            changed,
        })
    }
}
