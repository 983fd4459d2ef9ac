//! Cache-aware concurrent dispatch of classification and explanation
//!
//! Each subtask is either already [`Subtask::Cached`] or a [`Subtask::Pending`] future.
//! Pending work for both subtasks is awaited together, so two misses cost roughly the
//! slower of the two calls rather than their sum.

use futures::future::BoxFuture;
use sacha_common::derive_key;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{explanation_op, AnalysisCache, CachedResult, CLASSIFICATION_OP};
use crate::models::{Classification, Language};
use crate::services::{AiError, DocumentAnalyst};

/// One AI subtask: a cached value or work still to run
pub enum Subtask<'a, T> {
    Cached(T),
    Pending(BoxFuture<'a, Result<T, AiError>>),
}

impl<'a, T> Subtask<'a, T> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Subtask::Cached(_))
    }

    /// Value plus whether it came from the cache
    pub async fn resolve(self) -> Result<(T, bool), AiError> {
        match self {
            Subtask::Cached(value) => Ok((value, true)),
            Subtask::Pending(work) => work.await.map(|value| (value, false)),
        }
    }
}

/// Both AI results for one document
#[derive(Debug, Clone, PartialEq)]
pub struct DualDispatch {
    pub classification: Classification,
    pub explanation: String,
    /// True only when both results came from the cache
    pub cache_hit: bool,
}

/// First failure observed by [`DualDispatcher::dispatch`]
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("classification failed: {0}")]
    Classification(AiError),

    #[error("explanation failed: {0}")]
    Explanation(AiError),
}

/// Runs AI subtasks through the shared cache
#[derive(Clone)]
pub struct DualDispatcher {
    cache: Arc<AnalysisCache>,
    analyst: Arc<dyn DocumentAnalyst>,
}

impl DualDispatcher {
    pub fn new(cache: Arc<AnalysisCache>, analyst: Arc<dyn DocumentAnalyst>) -> Self {
        Self { cache, analyst }
    }

    pub fn classification_subtask<'a>(&'a self, text: &'a str) -> Subtask<'a, Classification> {
        let key = derive_key(text, CLASSIFICATION_OP);
        match self.cache.get(&key).and_then(CachedResult::into_classification) {
            Some(classification) => Subtask::Cached(classification),
            None => Subtask::Pending(Box::pin(async move {
                let classification = self.analyst.classify(text).await?;
                self.cache
                    .set(key, CachedResult::Classification(classification.clone()));
                Ok(classification)
            })),
        }
    }

    pub fn explanation_subtask<'a>(
        &'a self,
        text: &'a str,
        language: Language,
    ) -> Subtask<'a, String> {
        match self.cached_explanation(text, language) {
            Some(explanation) => Subtask::Cached(explanation),
            None => Subtask::Pending(Box::pin(async move {
                let explanation = self.analyst.explain(text, language).await?;
                self.store_explanation(text, language, &explanation);
                Ok(explanation)
            })),
        }
    }

    pub fn cached_explanation(&self, text: &str, language: Language) -> Option<String> {
        self.cache
            .get(&derive_key(text, &explanation_op(language)))
            .and_then(CachedResult::into_explanation)
    }

    pub fn store_explanation(&self, text: &str, language: Language, explanation: &str) {
        self.cache.set(
            derive_key(text, &explanation_op(language)),
            CachedResult::Explanation(explanation.to_string()),
        );
    }

    /// Classification alone, through the cache; returns the value and whether it was cached
    pub async fn classify(&self, text: &str) -> Result<(Classification, bool), AiError> {
        self.classification_subtask(text).resolve().await
    }

    /// Classification and explanation for `text`, running uncached work concurrently
    ///
    /// Both subtasks always run to completion, so a success is cached even when its
    /// sibling fails. When both fail the classification failure is reported.
    pub async fn dispatch(
        &self,
        text: &str,
        language: Language,
    ) -> Result<DualDispatch, DispatchError> {
        let classification = self.classification_subtask(text);
        let explanation = self.explanation_subtask(text, language);
        debug!(
            classification_cached = classification.is_cached(),
            explanation_cached = explanation.is_cached(),
            "Dispatching AI subtasks"
        );

        let (classification, explanation) =
            tokio::join!(classification.resolve(), explanation.resolve());

        let (classification, classification_cached) =
            classification.map_err(DispatchError::Classification)?;
        let (explanation, explanation_cached) = explanation.map_err(DispatchError::Explanation)?;

        Ok(DualDispatch {
            classification,
            explanation,
            cache_hit: classification_cached && explanation_cached,
        })
    }
}
