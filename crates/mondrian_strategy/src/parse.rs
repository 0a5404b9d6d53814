//! Strict decode of the model's JSON output.
//!
//! The schema is fixed: eight named dimensions, each a {score, comment}
//! record, plus an overall grade. Anything else is rejected; the caller
//! retries once before surfacing `parse_error`.

use mondrian_protocol::{Dimension, DimensionScore, DimensionalProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The model's analysis of one image: the eight-dimension record plus an
/// overall grade and optional caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelAnalysis {
    pub composition: DimensionScore,
    pub lighting: DimensionScore,
    pub focus_sharpness: DimensionScore,
    pub color_harmony: DimensionScore,
    pub subject_isolation: DimensionScore,
    pub depth_perspective: DimensionScore,
    pub visual_balance: DimensionScore,
    pub emotional_impact: DimensionScore,
    pub overall_grade: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ModelAnalysis {
    pub fn dimension(&self, dim: Dimension) -> &DimensionScore {
        match dim {
            Dimension::Composition => &self.composition,
            Dimension::Lighting => &self.lighting,
            Dimension::FocusSharpness => &self.focus_sharpness,
            Dimension::ColorHarmony => &self.color_harmony,
            Dimension::SubjectIsolation => &self.subject_isolation,
            Dimension::DepthPerspective => &self.depth_perspective,
            Dimension::VisualBalance => &self.visual_balance,
            Dimension::EmotionalImpact => &self.emotional_impact,
        }
    }

    /// Scores in canonical dimension order.
    pub fn score_vector(&self) -> [Option<f64>; 8] {
        let mut out = [None; 8];
        for dim in Dimension::ALL {
            out[dim.index()] = Some(self.dimension(*dim).score);
        }
        out
    }

    /// Materialize as a dimensional profile under the given key.
    pub fn to_profile(&self, advisor_id: &str, image_ref: &str) -> DimensionalProfile {
        let mut dimensions = BTreeMap::new();
        for dim in Dimension::ALL {
            dimensions.insert(*dim, self.dimension(*dim).clone());
        }
        DimensionalProfile {
            advisor_id: advisor_id.to_string(),
            image_ref: image_ref.to_string(),
            dimensions,
            overall_grade: Some(self.overall_grade),
            caption: self.caption.clone(),
            metadata: None,
            embedding: None,
            techniques: None,
        }
    }
}

/// Parse and validate a raw model response.
///
/// Scores must sit in [0, 10]; the grade likewise. Unknown fields fail the
/// decode outright.
pub fn parse_analysis(raw: &str) -> Result<ModelAnalysis, String> {
    let analysis: ModelAnalysis =
        serde_json::from_str(raw).map_err(|e| format!("schema mismatch: {e}"))?;

    for dim in Dimension::ALL {
        let score = analysis.dimension(*dim).score;
        if !(0.0..=10.0).contains(&score) {
            return Err(format!("{} score out of range: {}", dim, score));
        }
    }
    if !(0.0..=10.0).contains(&analysis.overall_grade) {
        return Err(format!(
            "overall grade out of range: {}",
            analysis.overall_grade
        ));
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_json(score: f64) -> String {
        let dim = |comment: &str| {
            format!(r#"{{"score": {score}, "comment": "{comment}"}}"#)
        };
        format!(
            r#"{{
                "composition": {},
                "lighting": {},
                "focus_sharpness": {},
                "color_harmony": {},
                "subject_isolation": {},
                "depth_perspective": {},
                "visual_balance": {},
                "emotional_impact": {},
                "overall_grade": {score}
            }}"#,
            dim("strong framing"),
            dim("even light"),
            dim("crisp"),
            dim("warm palette"),
            dim("clear subject"),
            dim("layered"),
            dim("steady"),
            dim("quiet power"),
        )
    }

    #[test]
    fn valid_payload_parses() {
        let analysis = parse_analysis(&sample_json(8.5)).unwrap();
        assert_eq!(analysis.composition.score, 8.5);
        assert_eq!(analysis.overall_grade, 8.5);
        assert_eq!(analysis.score_vector(), [Some(8.5); 8]);
    }

    #[test]
    fn missing_dimension_rejected() {
        let raw = sample_json(8.0).replace("\"lighting\"", "\"luminance\"");
        assert!(parse_analysis(&raw).is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let raw = sample_json(8.0).replace(
            "\"overall_grade\"",
            "\"mystery\": 1, \"overall_grade\"",
        );
        assert!(parse_analysis(&raw).is_err());
    }

    #[test]
    fn out_of_range_scores_rejected() {
        assert!(parse_analysis(&sample_json(11.0)).is_err());
        assert!(parse_analysis(&sample_json(-0.5)).is_err());
    }

    #[test]
    fn non_json_rejected() {
        assert!(parse_analysis("the image is nice").is_err());
    }

    #[test]
    fn profile_materialization_is_complete() {
        let analysis = parse_analysis(&sample_json(7.0)).unwrap();
        let profile = analysis.to_profile("job:abc", "uploads/img.jpg");
        assert!(profile.is_complete());
        assert_eq!(profile.overall_grade, Some(7.0));
        assert_eq!(profile.advisor_id, "job:abc");
    }
}
