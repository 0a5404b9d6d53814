//! Prompt assembly.
//!
//! Three prompt shapes: the persona prompt (system + advisor body + analyze
//! suffix), the minimal Pass-1 extraction prompt, and the augmented Pass-2
//! prompt carrying the retrieval context block. The context block is
//! deterministic so identical retrievals produce identical prompts.

use mondrian_protocol::Advisor;
use mondrian_retrieval::{Representative, VisualMatch};
use std::fmt::Write as _;

const SYSTEM_PROMPT: &str = "You are {advisor_id}, an expert photography critic. \
Score the image along eight dimensions (composition, lighting, focus_sharpness, \
color_harmony, subject_isolation, depth_perspective, visual_balance, \
emotional_impact), each 0-10 with a short comment, plus an overall_grade. \
Respond with a single JSON object and nothing else.";

const ANALYZE_SUFFIX: &str = "Analyze the image now.";

const EXTRACTION_PROMPT: &str = "Score the image along eight dimensions \
(composition, lighting, focus_sharpness, color_harmony, subject_isolation, \
depth_perspective, visual_balance, emotional_impact), each 0-10 with a short \
factual comment, plus an overall_grade. Respond with a single JSON object and \
nothing else. Analyze the image now.";

/// One-pass persona prompt: system prompt with the advisor id substituted,
/// the advisor's prompt body, and the fixed analyze suffix.
pub fn persona_prompt(advisor: &Advisor) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        SYSTEM_PROMPT.replace("{advisor_id}", &advisor.id),
        advisor.prompt.trim(),
        ANALYZE_SUFFIX
    )
}

/// Minimal Pass-1 prompt: dimensional extraction with no persona.
pub fn extraction_prompt() -> &'static str {
    EXTRACTION_PROMPT
}

/// Pass-2 prompt: persona plus a context block describing each
/// representative and an instruction block directing comparative critique.
///
/// An empty representative list yields the plain persona prompt, which is
/// the degraded path when retrieval has nothing to offer.
pub fn augmented_prompt(
    advisor: &Advisor,
    representatives: &[Representative],
    visual: Option<&[VisualMatch]>,
) -> String {
    if representatives.is_empty() && visual.map_or(true, |v| v.is_empty()) {
        return persona_prompt(advisor);
    }

    let mut context = String::new();
    context.push_str("Reference examples from your portfolio:\n");
    for (i, rep) in representatives.iter().enumerate() {
        let label = rep
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| rep.image_ref.clone());
        let _ = writeln!(
            context,
            "{}. \"{}\" targets {}: portfolio mean {:.2} (std {:.2}), the user scored {:.2}, a gap of {:.2}. This reference scores {:.2} on {}.",
            i + 1,
            label,
            rep.dimension.display_name(),
            rep.advisor_mean,
            rep.advisor_std,
            rep.user_score,
            rep.gap,
            rep.reference_score,
            rep.dimension.display_name(),
        );
        if let Some(meta) = &rep.metadata {
            if let Some(significance) = &meta.significance {
                let _ = writeln!(context, "   Significance: {}", significance);
            }
            if let Some(location) = &meta.location {
                let _ = writeln!(context, "   Location: {}", location);
            }
        }
        if let Some(comment) = &rep.comment {
            let _ = writeln!(context, "   Your note on this dimension: {}", comment);
        }
    }

    if let Some(matches) = visual {
        if !matches.is_empty() {
            context.push_str("Visually similar portfolio work:\n");
            for hit in matches {
                let _ = writeln!(
                    context,
                    "- {} (similarity {:.3})",
                    hit.image_ref, hit.similarity
                );
            }
        }
    }

    let instruction = "When critiquing, reference these portfolio examples \
comparatively: name each example, say what it does on its targeted dimension \
that the user's image does not, and ground your scores in that comparison.";

    format!(
        "{}\n\n{}\n\n{}\n\n{}\n\n{}",
        SYSTEM_PROMPT.replace("{advisor_id}", &advisor.id),
        advisor.prompt.trim(),
        context.trim_end(),
        instruction,
        ANALYZE_SUFFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mondrian_protocol::{Dimension, ProfileMetadata};

    fn advisor() -> Advisor {
        Advisor {
            id: "ansel".to_string(),
            name: "Ansel Adams".to_string(),
            biography: String::new(),
            prompt: "Judge tonal range above all.".to_string(),
            focus_areas: vec![],
            adapter: None,
            category: None,
        }
    }

    fn representative(dim: Dimension, gap: f64, title: &str) -> Representative {
        Representative {
            dimension: dim,
            gap,
            advisor_mean: 9.0,
            advisor_std: 0.5,
            user_score: 9.0 - gap,
            reference_score: 9.5,
            image_ref: format!("ref/{}.jpg", title),
            metadata: Some(ProfileMetadata {
                title: Some(title.to_string()),
                ..ProfileMetadata::default()
            }),
            overall_grade: Some(9.0),
            comment: Some("masterful".to_string()),
        }
    }

    #[test]
    fn persona_prompt_substitutes_advisor() {
        let prompt = persona_prompt(&advisor());
        assert!(prompt.contains("You are ansel"));
        assert!(prompt.contains("Judge tonal range above all."));
        assert!(prompt.ends_with("Analyze the image now."));
    }

    #[test]
    fn augmented_prompt_names_dimension_and_gap() {
        let reps = vec![
            representative(Dimension::Composition, 5.0, "Moonrise"),
            representative(Dimension::Lighting, 3.0, "Aspens"),
        ];
        let prompt = augmented_prompt(&advisor(), &reps, None);
        for rep in &reps {
            assert!(prompt.contains(rep.dimension.display_name()));
            assert!(prompt.contains(&format!("a gap of {:.2}", rep.gap)));
            assert!(prompt.contains(rep.title().unwrap()));
        }
        assert!(prompt.contains("reference these portfolio examples"));
    }

    #[test]
    fn empty_retrieval_degrades_to_persona() {
        assert_eq!(
            augmented_prompt(&advisor(), &[], None),
            persona_prompt(&advisor())
        );
    }

    #[test]
    fn augmented_prompt_is_deterministic() {
        let reps = vec![representative(Dimension::Composition, 5.0, "Moonrise")];
        assert_eq!(
            augmented_prompt(&advisor(), &reps, None),
            augmented_prompt(&advisor(), &reps, None)
        );
    }
}
