//! Canonical enums and records used across all crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Canonical Identifiers
// ============================================================================

/// Canonical job identifier across the system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Uuid::parse_str(s.trim()).map_err(|_| JobIdError::Parse(s.to_string()))?;
        Ok(Self(value))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobIdError {
    #[error("invalid job id: {0}")]
    Parse(String),
}

// ============================================================================
// Analysis Mode (Canonical Definition)
// ============================================================================

/// Analysis strategy requested by a client or resolved by the dispatcher.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Single pass with the advisor persona prompt only
    #[default]
    Baseline,
    /// Two passes with retrieval-augmented context between them
    Rag,
    /// Single pass through the adapter-augmented model handle
    Lora,
    /// Two passes, both through the adapter-augmented handle
    RagLora,
}

impl AnalysisMode {
    pub const ALL: &'static [AnalysisMode] = &[
        AnalysisMode::Baseline,
        AnalysisMode::Rag,
        AnalysisMode::Lora,
        AnalysisMode::RagLora,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Baseline => "baseline",
            AnalysisMode::Rag => "rag",
            AnalysisMode::Lora => "lora",
            AnalysisMode::RagLora => "rag_lora",
        }
    }

    /// The ordered fallback chain walked by the dispatcher.
    ///
    /// `rag_lora` is terminal: the caller asked for the explicit hybrid and
    /// silently degrading to a single mode would mask configuration drift.
    pub fn fallback_chain(&self) -> &'static [AnalysisMode] {
        match self {
            AnalysisMode::Baseline => &[AnalysisMode::Baseline],
            AnalysisMode::Rag => &[AnalysisMode::Rag, AnalysisMode::Baseline],
            AnalysisMode::Lora => &[
                AnalysisMode::Lora,
                AnalysisMode::Rag,
                AnalysisMode::Baseline,
            ],
            AnalysisMode::RagLora => &[AnalysisMode::RagLora],
        }
    }

    /// Whether this mode runs the two-pass extract/compare structure.
    pub fn is_two_pass(&self) -> bool {
        matches!(self, AnalysisMode::Rag | AnalysisMode::RagLora)
    }

    /// Whether this mode runs through the adapter-augmented handle.
    pub fn uses_adapter(&self) -> bool {
        matches!(self, AnalysisMode::Lora | AnalysisMode::RagLora)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(AnalysisMode::Baseline),
            "rag" => Ok(AnalysisMode::Rag),
            "lora" => Ok(AnalysisMode::Lora),
            "rag_lora" | "rag+lora" => Ok(AnalysisMode::RagLora),
            _ => Err(format!(
                "Invalid analysis mode: '{}'. Expected: baseline, rag, lora, or rag_lora",
                s
            )),
        }
    }
}

// ============================================================================
// Job Status (Canonical Definition)
// ============================================================================

/// Job lifecycle status.
/// Transitions are linear forward, plus `error` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job created, waiting for a worker
    #[default]
    Queued,
    /// Worker claimed the job, normalizing input
    Processing,
    /// Advisor analysis in flight
    Analyzing,
    /// Composing the combined rendered output
    Finalizing,
    /// Job completed successfully
    Done,
    /// Job failed; `error_kind` carries the taxonomy tag
    Error,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Analyzing,
        JobStatus::Finalizing,
        JobStatus::Done,
        JobStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Position in the forward chain. Terminal states have no successor.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Analyzing => 2,
            JobStatus::Finalizing => 3,
            JobStatus::Done => 4,
            JobStatus::Error => 5,
        }
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Error {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "analyzing" => Ok(JobStatus::Analyzing),
            "finalizing" => Ok(JobStatus::Finalizing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

// ============================================================================
// Job Phase
// ============================================================================

/// Coarse sub-step of a status, used only by the progress function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    ImageProcessing,
    AdvisorPreparation,
    AdvisorAnalysis,
    Finalizing,
    Done,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::ImageProcessing => "image_processing",
            JobPhase::AdvisorPreparation => "advisor_preparation",
            JobPhase::AdvisorAnalysis => "advisor_analysis",
            JobPhase::Finalizing => "finalizing",
            JobPhase::Done => "done",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image_processing" => Ok(JobPhase::ImageProcessing),
            "advisor_preparation" => Ok(JobPhase::AdvisorPreparation),
            "advisor_analysis" => Ok(JobPhase::AdvisorAnalysis),
            "finalizing" => Ok(JobPhase::Finalizing),
            "done" => Ok(JobPhase::Done),
            _ => Err(format!("Invalid job phase: '{}'", s)),
        }
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Error kinds surfaced in `job.error_kind` and API error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed upload, unknown advisor, unknown mode
    BadInput,
    /// Requested mode cannot be satisfied and has no fallback
    Unavailable,
    /// Model callable exceeded the per-call budget
    ModelTimeout,
    /// Model output did not match the expected schema after one retry
    ParseError,
    /// `rag_lora` lost retrieval and cannot degrade
    RetrievalRequired,
    /// Job exceeded its wall-clock budget and was reaped
    Timeout,
    /// Everything else
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ModelTimeout => "model_timeout",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::RetrievalRequired => "retrieval_required",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bad_input" => Ok(ErrorKind::BadInput),
            "unavailable" => Ok(ErrorKind::Unavailable),
            "model_timeout" => Ok(ErrorKind::ModelTimeout),
            "parse_error" => Ok(ErrorKind::ParseError),
            "retrieval_required" => Ok(ErrorKind::RetrievalRequired),
            "timeout" => Ok(ErrorKind::Timeout),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(format!("Invalid error kind: '{}'", s)),
        }
    }
}

// ============================================================================
// Dimensional Profile
// ============================================================================

/// The eight fixed analysis dimensions, in canonical order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Composition,
    Lighting,
    FocusSharpness,
    ColorHarmony,
    SubjectIsolation,
    DepthPerspective,
    VisualBalance,
    EmotionalImpact,
}

impl Dimension {
    pub const ALL: &'static [Dimension] = &[
        Dimension::Composition,
        Dimension::Lighting,
        Dimension::FocusSharpness,
        Dimension::ColorHarmony,
        Dimension::SubjectIsolation,
        Dimension::DepthPerspective,
        Dimension::VisualBalance,
        Dimension::EmotionalImpact,
    ];

    /// Index in canonical order; also the tie-break order for equal gaps.
    pub fn index(&self) -> usize {
        match self {
            Dimension::Composition => 0,
            Dimension::Lighting => 1,
            Dimension::FocusSharpness => 2,
            Dimension::ColorHarmony => 3,
            Dimension::SubjectIsolation => 4,
            Dimension::DepthPerspective => 5,
            Dimension::VisualBalance => 6,
            Dimension::EmotionalImpact => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Composition => "composition",
            Dimension::Lighting => "lighting",
            Dimension::FocusSharpness => "focus_sharpness",
            Dimension::ColorHarmony => "color_harmony",
            Dimension::SubjectIsolation => "subject_isolation",
            Dimension::DepthPerspective => "depth_perspective",
            Dimension::VisualBalance => "visual_balance",
            Dimension::EmotionalImpact => "emotional_impact",
        }
    }

    /// Human-readable name for rendered output and prompt text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Dimension::Composition => "Composition",
            Dimension::Lighting => "Lighting",
            Dimension::FocusSharpness => "Focus & Sharpness",
            Dimension::ColorHarmony => "Color Harmony",
            Dimension::SubjectIsolation => "Subject Isolation",
            Dimension::DepthPerspective => "Depth & Perspective",
            Dimension::VisualBalance => "Visual Balance",
            Dimension::EmotionalImpact => "Emotional Impact",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "composition" => Ok(Dimension::Composition),
            "lighting" => Ok(Dimension::Lighting),
            "focus_sharpness" => Ok(Dimension::FocusSharpness),
            "color_harmony" => Ok(Dimension::ColorHarmony),
            "subject_isolation" => Ok(Dimension::SubjectIsolation),
            "depth_perspective" => Ok(Dimension::DepthPerspective),
            "visual_balance" => Ok(Dimension::VisualBalance),
            "emotional_impact" => Ok(Dimension::EmotionalImpact),
            _ => Err(format!("Invalid dimension: '{}'", s)),
        }
    }
}

/// One dimension's score and free-text comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Score in [0, 10]
    pub score: f64,
    pub comment: String,
}

/// Optional descriptive metadata attached to a reference profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
}

impl ProfileMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.date_taken.is_none()
            && self.location.is_none()
            && self.significance.is_none()
    }
}

/// An image's scores along the eight fixed dimensions, keyed to one advisor.
///
/// Reference profiles come from the ingest pass over an advisor's portfolio;
/// transient profiles are the Pass-1 output of a RAG-family job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionalProfile {
    pub advisor_id: String,
    pub image_ref: String,
    /// Per-dimension score + comment. All eight must be present for the
    /// profile to participate in retrieval.
    pub dimensions: BTreeMap<Dimension, DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_grade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProfileMetadata>,
    /// Unit-normalized embedding of dimension D, consistent across an
    /// advisor's profile set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub techniques: Option<BTreeMap<String, String>>,
}

impl DimensionalProfile {
    pub fn score(&self, dimension: Dimension) -> Option<f64> {
        self.dimensions.get(&dimension).map(|d| d.score)
    }

    pub fn comment(&self, dimension: Dimension) -> Option<&str> {
        self.dimensions.get(&dimension).map(|d| d.comment.as_str())
    }

    /// All eight scores present?
    pub fn is_complete(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.dimensions.contains_key(d))
    }

    /// The eight scores in canonical order, or None for missing dimensions.
    pub fn score_vector(&self) -> [Option<f64>; 8] {
        let mut out = [None; 8];
        for dim in Dimension::ALL {
            out[dim.index()] = self.score(*dim);
        }
        out
    }
}

// ============================================================================
// Advisor
// ============================================================================

/// Configuration of one persona: prompt, focus areas, optional adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Advisor {
    /// Short string id, e.g. "ansel"
    pub id: String,
    /// Display name, e.g. "Ansel Adams"
    pub name: String,
    #[serde(default)]
    pub biography: String,
    /// Persona prompt body appended to the system prompt
    pub prompt: String,
    /// Ordered focus areas
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Opaque adapter handle; None means no fine-tuned variant exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

// ============================================================================
// Advisor Selection
// ============================================================================

/// Parsed form of the upload `advisor` field: a known id, a comma list,
/// `all`, or `random`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisorSelector {
    One(String),
    List(Vec<String>),
    All,
    Random,
}

impl AdvisorSelector {
    pub fn parse(raw: &str) -> Result<Self, SelectorError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        match trimmed.to_lowercase().as_str() {
            "all" => return Ok(AdvisorSelector::All),
            "random" => return Ok(AdvisorSelector::Random),
            _ => {}
        }
        if trimmed.contains(',') {
            let ids: Vec<String> = trimmed
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err(SelectorError::Empty);
            }
            return Ok(AdvisorSelector::List(ids));
        }
        Ok(AdvisorSelector::One(trimmed.to_string()))
    }
}

impl fmt::Display for AdvisorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisorSelector::One(id) => write!(f, "{}", id),
            AdvisorSelector::List(ids) => write!(f, "{}", ids.join(",")),
            AdvisorSelector::All => write!(f, "all"),
            AdvisorSelector::Random => write!(f, "random"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("advisor selector is empty")]
    Empty,
}
