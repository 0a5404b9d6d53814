//! Visual similarity over pre-computed profile embeddings.

use mondrian_protocol::DimensionalProfile;

/// One hit of the visual-similarity path.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualMatch {
    pub image_ref: String,
    pub similarity: f32,
    pub caption: Option<String>,
}

/// Top-k profiles by cosine similarity against a unit-normalized query.
///
/// Descending similarity; ties break lexicographically by image reference so
/// results are stable across runs. Profiles without an embedding, or with a
/// mismatched dimensionality, are skipped.
pub fn visual_top_k(
    profiles: &[DimensionalProfile],
    query: &[f32],
    k: usize,
) -> Vec<VisualMatch> {
    let mut hits: Vec<VisualMatch> = profiles
        .iter()
        .filter_map(|p| {
            let embedding = p.embedding.as_deref()?;
            if embedding.len() != query.len() {
                return None;
            }
            Some(VisualMatch {
                image_ref: p.image_ref.clone(),
                similarity: cosine(embedding, query),
                caption: p.caption.clone(),
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.image_ref.cmp(&b.image_ref))
    });
    hits.truncate(k);
    hits
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mondrian_protocol::{Dimension, DimensionScore};
    use std::collections::BTreeMap;

    fn profile_with_embedding(image_ref: &str, embedding: Option<Vec<f32>>) -> DimensionalProfile {
        let mut dimensions = BTreeMap::new();
        for dim in Dimension::ALL {
            dimensions.insert(
                *dim,
                DimensionScore {
                    score: 8.0,
                    comment: String::new(),
                },
            );
        }
        DimensionalProfile {
            advisor_id: "ansel".to_string(),
            image_ref: image_ref.to_string(),
            dimensions,
            overall_grade: None,
            caption: None,
            metadata: None,
            embedding,
            techniques: None,
        }
    }

    #[test]
    fn ranks_by_cosine_descending() {
        let profiles = vec![
            profile_with_embedding("ref/orthogonal.jpg", Some(vec![0.0, 1.0])),
            profile_with_embedding("ref/aligned.jpg", Some(vec![1.0, 0.0])),
            profile_with_embedding("ref/diagonal.jpg", Some(vec![0.7, 0.7])),
        ];
        let hits = visual_top_k(&profiles, &[1.0, 0.0], 3);
        assert_eq!(hits[0].image_ref, "ref/aligned.jpg");
        assert_eq!(hits[1].image_ref, "ref/diagonal.jpg");
        assert_eq!(hits[2].image_ref, "ref/orthogonal.jpg");
    }

    #[test]
    fn ties_break_lexicographically_and_stably() {
        let profiles = vec![
            profile_with_embedding("ref/b.jpg", Some(vec![1.0, 0.0])),
            profile_with_embedding("ref/a.jpg", Some(vec![1.0, 0.0])),
        ];
        let first = visual_top_k(&profiles, &[1.0, 0.0], 2);
        let second = visual_top_k(&profiles, &[1.0, 0.0], 2);
        assert_eq!(first[0].image_ref, "ref/a.jpg");
        assert_eq!(first, second);
    }

    #[test]
    fn skips_missing_and_mismatched_embeddings() {
        let profiles = vec![
            profile_with_embedding("ref/none.jpg", None),
            profile_with_embedding("ref/short.jpg", Some(vec![1.0])),
            profile_with_embedding("ref/ok.jpg", Some(vec![1.0, 0.0])),
        ];
        let hits = visual_top_k(&profiles, &[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].image_ref, "ref/ok.jpg");
    }
}
