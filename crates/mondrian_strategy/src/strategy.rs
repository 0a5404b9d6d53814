//! Mode resolution and strategy execution.

use async_trait::async_trait;
use mondrian_protocol::{defaults, Advisor, AnalysisMode, DimensionalProfile, JobId};
use mondrian_retrieval::{
    analyze_distribution, visual_top_k, EmbeddingBackend, Representative, RetrievalParams,
    VisualMatch,
};
use mondrian_store::{Store, StoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::AdapterCache;
use crate::error::StrategyError;
use crate::model::{ModelCallable, ModelError, ModelGate, ModelHandle, ThinkingSink};
use crate::parse::{parse_analysis, ModelAnalysis};
use crate::prompts::{augmented_prompt, extraction_prompt, persona_prompt};

/// Profile access the dispatcher needs. [`Store`] is the production
/// implementation; tests substitute failing or canned sources.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn upsert_profile(&self, profile: &DimensionalProfile) -> Result<(), StoreError>;
    async fn profiles_for_advisor(
        &self,
        advisor_id: &str,
    ) -> Result<Vec<DimensionalProfile>, StoreError>;
    async fn profile_count(&self, advisor_id: &str) -> Result<u64, StoreError>;
}

#[async_trait]
impl ProfileStore for Store {
    async fn upsert_profile(&self, profile: &DimensionalProfile) -> Result<(), StoreError> {
        Store::upsert_profile(self, profile).await
    }

    async fn profiles_for_advisor(
        &self,
        advisor_id: &str,
    ) -> Result<Vec<DimensionalProfile>, StoreError> {
        Store::get_profiles_for_advisor(self, advisor_id).await
    }

    async fn profile_count(&self, advisor_id: &str) -> Result<u64, StoreError> {
        Store::count_profiles_for_advisor(self, advisor_id).await
    }
}

/// One analysis request handed to the dispatcher by a worker.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub job_id: JobId,
    pub image_ref: String,
    pub advisor: Advisor,
    pub requested_mode: AnalysisMode,
}

/// Strategy-specific metadata recorded alongside a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass1_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass2_ms: Option<u64>,
    pub total_ms: u64,
    /// Representative examples woven into the Pass-2 prompt
    pub representatives: usize,
    /// True when retrieval reverted to an empty context block
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

/// The dispatcher's result: scores, grade, effective mode, metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub analysis: ModelAnalysis,
    pub mode_used: AnalysisMode,
    pub advisor_id: String,
    pub metadata: StrategyMetadata,
}

/// Stateless strategy dispatcher: availability predicates plus one- and
/// two-pass orchestration.
pub struct Dispatcher {
    profiles: Arc<dyn ProfileStore>,
    model: ModelGate,
    adapters: AdapterCache,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
    params: RetrievalParams,
    base_model: String,
    visual_k: usize,
}

impl Dispatcher {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        model: Arc<dyn ModelCallable>,
        adapters: AdapterCache,
        base_model: impl Into<String>,
    ) -> Self {
        Self {
            profiles,
            model: ModelGate::new(model),
            adapters,
            embeddings: None,
            params: RetrievalParams::default(),
            base_model: base_model.into(),
            visual_k: defaults::VISUAL_TOP_K,
        }
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingBackend>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_params(mut self, params: RetrievalParams) -> Self {
        self.params = params;
        self
    }

    /// Availability predicate for one (mode, advisor) pair.
    pub async fn available(
        &self,
        mode: AnalysisMode,
        advisor: &Advisor,
    ) -> Result<bool, StrategyError> {
        match mode {
            AnalysisMode::Baseline => Ok(true),
            AnalysisMode::Rag => self.rag_available(advisor).await,
            AnalysisMode::Lora => Ok(self.lora_available(advisor).await),
            AnalysisMode::RagLora => {
                Ok(self.rag_available(advisor).await? && self.lora_available(advisor).await)
            }
        }
    }

    /// Enough reference profiles for distribution analysis to mean anything.
    async fn rag_available(&self, advisor: &Advisor) -> Result<bool, StrategyError> {
        let count = self.profiles.profile_count(&advisor.id).await?;
        Ok(count as usize >= defaults::MIN_REFERENCE_PROFILES)
    }

    /// An adapter handle exists and loads (cached after the first attempt).
    async fn lora_available(&self, advisor: &Advisor) -> bool {
        match &advisor.adapter {
            Some(adapter) => self.adapters.ensure_loaded(adapter).await,
            None => false,
        }
    }

    /// Walk the fallback chain to the first available mode.
    ///
    /// Idempotent: availability is deterministic for a fixed store state, so
    /// resolving twice yields the same effective mode.
    pub async fn resolve(
        &self,
        requested: AnalysisMode,
        advisor: &Advisor,
    ) -> Result<AnalysisMode, StrategyError> {
        for candidate in requested.fallback_chain() {
            if self.available(*candidate, advisor).await? {
                if *candidate != requested {
                    info!(
                        "Mode {} unavailable for {}, falling back to {}",
                        requested, advisor.id, candidate
                    );
                }
                return Ok(*candidate);
            }
        }
        Err(StrategyError::Unavailable {
            mode: requested,
            advisor: advisor.id.clone(),
        })
    }

    /// Run the analysis, resolving the mode first.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        thinking: &ThinkingSink,
    ) -> Result<AnalysisOutcome, StrategyError> {
        let start = Instant::now();
        let effective = self.resolve(request.requested_mode, &request.advisor).await?;

        let handle = if effective.uses_adapter() {
            let adapter = request.advisor.adapter.clone().ok_or_else(|| {
                StrategyError::Internal(format!(
                    "mode {} resolved without an adapter for {}",
                    effective, request.advisor.id
                ))
            })?;
            ModelHandle::with_adapter(&self.base_model, adapter)
        } else {
            ModelHandle::base_only(&self.base_model)
        };

        if effective.is_two_pass() {
            self.run_two_pass(request, effective, &handle, thinking, start)
                .await
        } else {
            self.run_single_pass(request, effective, &handle, thinking, start)
                .await
        }
    }

    async fn run_single_pass(
        &self,
        request: &AnalysisRequest,
        effective: AnalysisMode,
        handle: &ModelHandle,
        thinking: &ThinkingSink,
        start: Instant,
    ) -> Result<AnalysisOutcome, StrategyError> {
        thinking.push(format!("Studying the image as {}", request.advisor.name));
        let prompt = persona_prompt(&request.advisor);
        let analysis = self
            .call_with_retry(&request.image_ref, &prompt, handle, thinking)
            .await?;

        Ok(AnalysisOutcome {
            analysis,
            mode_used: effective,
            advisor_id: request.advisor.id.clone(),
            metadata: StrategyMetadata {
                total_ms: start.elapsed().as_millis() as u64,
                adapter: handle.adapter.clone(),
                ..StrategyMetadata::default()
            },
        })
    }

    async fn run_two_pass(
        &self,
        request: &AnalysisRequest,
        effective: AnalysisMode,
        handle: &ModelHandle,
        thinking: &ThinkingSink,
        start: Instant,
    ) -> Result<AnalysisOutcome, StrategyError> {
        // Pass 1: dimensional extraction, no persona.
        let pass1_start = Instant::now();
        thinking.push("Extracting the dimensional profile");
        let extraction = self
            .call_with_retry(&request.image_ref, extraction_prompt(), handle, thinking)
            .await?;
        let pass1_ms = pass1_start.elapsed().as_millis() as u64;

        // The transient profile lives under a job-scoped key so it never
        // joins the advisor's reference set.
        let transient = extraction.to_profile(
            &format!("job:{}", request.job_id),
            &request.image_ref,
        );
        self.profiles.upsert_profile(&transient).await?;

        // Query phase.
        let query_start = Instant::now();
        thinking.push("Consulting the portfolio");
        let query = self
            .run_query_phase(&request.advisor, &request.image_ref, &extraction)
            .await;
        let (representatives, visual, degraded) = match query {
            Ok((reps, visual, insufficient)) => {
                let degraded = insufficient;
                (reps, visual, degraded)
            }
            Err(err) => {
                if effective == AnalysisMode::RagLora {
                    // The explicit hybrid cannot degrade.
                    return Err(StrategyError::RetrievalRequired(err.to_string()));
                }
                warn!(
                    "Retrieval failed for {}, continuing with empty context: {}",
                    request.advisor.id, err
                );
                (Vec::new(), None, true)
            }
        };
        let query_ms = query_start.elapsed().as_millis() as u64;

        // Pass 2: comparative analysis with the augmented prompt.
        let pass2_start = Instant::now();
        thinking.push("Comparing against portfolio references");
        let prompt = augmented_prompt(&request.advisor, &representatives, visual.as_deref());
        let analysis = self
            .call_with_retry(&request.image_ref, &prompt, handle, thinking)
            .await?;
        let pass2_ms = pass2_start.elapsed().as_millis() as u64;

        Ok(AnalysisOutcome {
            analysis,
            mode_used: effective,
            advisor_id: request.advisor.id.clone(),
            metadata: StrategyMetadata {
                pass1_ms: Some(pass1_ms),
                query_ms: Some(query_ms),
                pass2_ms: Some(pass2_ms),
                total_ms: start.elapsed().as_millis() as u64,
                representatives: representatives.len(),
                degraded,
                adapter: handle.adapter.clone(),
            },
        })
    }

    /// Distribution retrieval plus the optional visual path.
    ///
    /// The visual path never fails the query: embedding errors degrade it to
    /// unavailable. Store errors are real retrieval failures and propagate.
    async fn run_query_phase(
        &self,
        advisor: &Advisor,
        image_ref: &str,
        extraction: &ModelAnalysis,
    ) -> Result<(Vec<Representative>, Option<Vec<VisualMatch>>, bool), StoreError> {
        let references = self.profiles.profiles_for_advisor(&advisor.id).await?;
        let outcome =
            analyze_distribution(&references, &extraction.score_vector(), &self.params);
        if outcome.insufficient_data {
            debug!("Insufficient reference data for {}", advisor.id);
        }

        let visual = match &self.embeddings {
            Some(backend) => match backend.embed(image_ref).await {
                Ok(query) => Some(visual_top_k(&references, &query, self.visual_k)),
                Err(err) => {
                    warn!("Visual similarity unavailable: {}", err);
                    None
                }
            },
            None => None,
        };

        Ok((outcome.representatives, visual, outcome.insufficient_data))
    }

    /// Call the model, retrying a parse failure once with the same prompt.
    async fn call_with_retry(
        &self,
        image_ref: &str,
        prompt: &str,
        handle: &ModelHandle,
        thinking: &ThinkingSink,
    ) -> Result<ModelAnalysis, StrategyError> {
        let mut last_failure = String::new();
        for attempt in 0..2 {
            let raw = match self.model.run(image_ref, prompt, handle, thinking).await {
                Ok(raw) => raw,
                Err(ModelError::Timeout) => return Err(StrategyError::ModelTimeout),
                Err(ModelError::BadOutput(msg)) => {
                    debug!("Model output unusable (attempt {}): {}", attempt + 1, msg);
                    last_failure = msg;
                    continue;
                }
            };
            match parse_analysis(&raw) {
                Ok(analysis) => return Ok(analysis),
                Err(msg) => {
                    debug!("Parse failure (attempt {}): {}", attempt + 1, msg);
                    last_failure = msg;
                }
            }
        }
        Err(StrategyError::ParseError(last_failure))
    }
}
