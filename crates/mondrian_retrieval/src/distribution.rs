//! Dimensional-distribution analysis and representative selection.

use mondrian_protocol::{defaults, Dimension, DimensionalProfile, ProfileMetadata};
use std::collections::BTreeMap;
use tracing::debug;

/// Tuning knobs for the distribution path.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// A dimension underperforms iff user < mean - k * std
    pub threshold_k: f64,
    /// Floor applied to the population std
    pub std_floor: f64,
    /// Cap on returned representatives
    pub max_representatives: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            threshold_k: defaults::UNDERPERFORMANCE_THRESHOLD,
            std_floor: defaults::STD_DEV_FLOOR,
            max_representatives: defaults::MAX_REPRESENTATIVES,
        }
    }
}

/// Mean and floored population std of one dimension over a portfolio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// A reference profile chosen to exemplify strong performance on one
/// dimension, annotated with everything the augmented prompt needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    pub dimension: Dimension,
    /// mean - user score
    pub gap: f64,
    pub advisor_mean: f64,
    pub advisor_std: f64,
    pub user_score: f64,
    /// The representative's own score on the targeted dimension
    pub reference_score: f64,
    pub image_ref: String,
    pub metadata: Option<ProfileMetadata>,
    pub overall_grade: Option<f64>,
    /// The advisor's comment on the targeted dimension
    pub comment: Option<String>,
}

impl Representative {
    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }
}

/// Result of a distribution analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionOutcome {
    /// At most `max_representatives`, in descending gap order
    pub representatives: Vec<Representative>,
    /// True when fewer than two complete reference profiles exist
    pub insufficient_data: bool,
    /// Per-dimension portfolio statistics (empty when insufficient)
    pub stats: BTreeMap<Dimension, DimensionStats>,
}

/// Compare a user's score vector against an advisor's reference portfolio.
///
/// Deterministic: identical inputs always select identical representatives.
/// Profiles missing any dimension score do not participate; user dimensions
/// without a score are treated as non-underperforming.
pub fn analyze_distribution(
    profiles: &[DimensionalProfile],
    user_scores: &[Option<f64>; 8],
    params: &RetrievalParams,
) -> DistributionOutcome {
    let complete: Vec<&DimensionalProfile> =
        profiles.iter().filter(|p| p.is_complete()).collect();

    if complete.len() < defaults::MIN_REFERENCE_PROFILES {
        debug!(
            "Distribution analysis skipped: {} complete profiles",
            complete.len()
        );
        return DistributionOutcome {
            representatives: Vec::new(),
            insufficient_data: true,
            stats: BTreeMap::new(),
        };
    }

    let mut stats = BTreeMap::new();
    for dim in Dimension::ALL {
        let scores: Vec<f64> = complete.iter().filter_map(|p| p.score(*dim)).collect();
        stats.insert(*dim, dimension_stats(&scores, params.std_floor));
    }

    // Underperforming dimensions, largest gap first; equal gaps resolve by
    // dimension index.
    let mut underperforming: Vec<(Dimension, f64)> = Vec::new();
    for dim in Dimension::ALL {
        let Some(user) = user_scores[dim.index()] else {
            continue;
        };
        let s = stats[dim];
        if user < s.mean - params.threshold_k * s.std_dev {
            underperforming.push((*dim, s.mean - user));
        }
    }
    underperforming.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.index().cmp(&b.0.index()))
    });

    let cap = params.max_representatives.min(underperforming.len());
    let representatives = underperforming
        .into_iter()
        .take(cap)
        .map(|(dim, gap)| {
            let reference = select_representative(&complete, dim);
            let s = stats[&dim];
            Representative {
                dimension: dim,
                gap,
                advisor_mean: s.mean,
                advisor_std: s.std_dev,
                user_score: user_scores[dim.index()].unwrap_or(0.0),
                reference_score: reference.score(dim).unwrap_or(0.0),
                image_ref: reference.image_ref.clone(),
                metadata: reference.metadata.clone(),
                overall_grade: reference.overall_grade,
                comment: reference.comment(dim).map(str::to_string),
            }
        })
        .collect();

    DistributionOutcome {
        representatives,
        insufficient_data: false,
        stats,
    }
}

fn dimension_stats(scores: &[f64], std_floor: f64) -> DimensionStats {
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    DimensionStats {
        mean,
        std_dev: variance.sqrt().max(std_floor),
    }
}

/// The profile with the highest score on `dim`. Ties prefer higher overall
/// grade, then richer metadata (non-empty title, then significance), then
/// lowest image_ref lexicographically.
fn select_representative<'a>(
    profiles: &[&'a DimensionalProfile],
    dim: Dimension,
) -> &'a DimensionalProfile {
    let mut best = profiles[0];
    for candidate in &profiles[1..] {
        if beats(candidate, best, dim) {
            best = candidate;
        }
    }
    best
}

fn beats(candidate: &DimensionalProfile, incumbent: &DimensionalProfile, dim: Dimension) -> bool {
    let c_score = candidate.score(dim).unwrap_or(f64::MIN);
    let i_score = incumbent.score(dim).unwrap_or(f64::MIN);
    if c_score != i_score {
        return c_score > i_score;
    }

    let c_grade = candidate.overall_grade.unwrap_or(f64::MIN);
    let i_grade = incumbent.overall_grade.unwrap_or(f64::MIN);
    if c_grade != i_grade {
        return c_grade > i_grade;
    }

    let c_rich = metadata_richness(candidate);
    let i_rich = metadata_richness(incumbent);
    if c_rich != i_rich {
        return c_rich > i_rich;
    }

    candidate.image_ref < incumbent.image_ref
}

/// 2 = has title, 1 = has significance only, 0 = neither.
fn metadata_richness(profile: &DimensionalProfile) -> u8 {
    let Some(meta) = profile.metadata.as_ref() else {
        return 0;
    };
    if meta.title.as_deref().is_some_and(|t| !t.is_empty()) {
        2
    } else if meta.significance.as_deref().is_some_and(|s| !s.is_empty()) {
        1
    } else {
        0
    }
}
