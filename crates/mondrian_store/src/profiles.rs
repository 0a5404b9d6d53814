//! Dimensional profile persistence and the embedding nearest-neighbor query.
//!
//! Profiles are content-addressed by (advisor_id, image_ref); upsert is
//! idempotent under identical inputs.

use mondrian_protocol::DimensionalProfile;
use sqlx::Row;

use crate::error::StoreError;
use crate::store::Store;

impl Store {
    pub async fn upsert_profile(&self, profile: &DimensionalProfile) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(profile)?;
        sqlx::query(
            r#"
            INSERT INTO profiles (advisor_id, image_ref, record) VALUES (?, ?, ?)
            ON CONFLICT(advisor_id, image_ref) DO UPDATE SET record = excluded.record
            "#,
        )
        .bind(&profile.advisor_id)
        .bind(&profile.image_ref)
        .bind(serialized)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_profiles_for_advisor(
        &self,
        advisor_id: &str,
    ) -> Result<Vec<DimensionalProfile>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM profiles WHERE advisor_id = ? ORDER BY image_ref ASC",
        )
        .bind(advisor_id)
        .fetch_all(self.pool())
        .await?;
        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            profiles.push(serde_json::from_str(row.get::<String, _>(0).as_str())?);
        }
        Ok(profiles)
    }

    pub async fn count_profiles_for_advisor(&self, advisor_id: &str) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE advisor_id = ?")
                .bind(advisor_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count as u64)
    }

    /// Top-k profiles by cosine similarity against `query`, descending, ties
    /// broken by lexicographic image_ref. Profiles without embeddings are
    /// skipped.
    pub async fn find_profiles_by_embedding(
        &self,
        advisor_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(DimensionalProfile, f32)>, StoreError> {
        let profiles = self.get_profiles_for_advisor(advisor_id).await?;

        let mut scored: Vec<(DimensionalProfile, f32)> = profiles
            .into_iter()
            .filter_map(|p| {
                let embedding = p.embedding.as_deref()?;
                if embedding.len() != query.len() {
                    return None;
                }
                let similarity = cosine(embedding, query);
                Some((p, similarity))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.image_ref.cmp(&b.0.image_ref))
        });
        scored.truncate(k);
        Ok(scored)
    }
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

    fn sample_profile(advisor_id: &str, image_ref: &str) -> DimensionalProfile {
        let mut dimensions = BTreeMap::new();
        for dim in Dimension::ALL {
            dimensions.insert(
                *dim,
                DimensionScore {
                    score: 8.0,
                    comment: format!("strong {}", dim),
                },
            );
        }
        DimensionalProfile {
            advisor_id: advisor_id.to_string(),
            image_ref: image_ref.to_string(),
            dimensions,
            overall_grade: Some(9.0),
            caption: None,
            metadata: None,
            embedding: None,
            techniques: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let profile = sample_profile("ansel", "ref/a.jpg");

        store.upsert_profile(&profile).await.unwrap();
        store.upsert_profile(&profile).await.unwrap();

        let profiles = store.get_profiles_for_advisor("ansel").await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0], profile);
        assert_eq!(store.count_profiles_for_advisor("ansel").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_search_orders_by_similarity() {
        let store = Store::open_in_memory().await.unwrap();

        let mut near = sample_profile("ansel", "ref/near.jpg");
        near.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut far = sample_profile("ansel", "ref/far.jpg");
        far.embedding = Some(vec![0.0, 1.0, 0.0]);
        let mut mid = sample_profile("ansel", "ref/mid.jpg");
        mid.embedding = Some(vec![0.7, 0.7, 0.0]);
        // No embedding: excluded from the search.
        let bare = sample_profile("ansel", "ref/bare.jpg");

        for p in [&near, &far, &mid, &bare] {
            store.upsert_profile(p).await.unwrap();
        }

        let hits = store
            .find_profiles_by_embedding("ansel", &[1.0, 0.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.image_ref, "ref/near.jpg");
        assert_eq!(hits[1].0.image_ref, "ref/mid.jpg");
    }

    #[tokio::test]
    async fn embedding_search_ties_break_lexicographically() {
        let store = Store::open_in_memory().await.unwrap();

        let mut b = sample_profile("ansel", "ref/b.jpg");
        b.embedding = Some(vec![1.0, 0.0]);
        let mut a = sample_profile("ansel", "ref/a.jpg");
        a.embedding = Some(vec![1.0, 0.0]);

        store.upsert_profile(&b).await.unwrap();
        store.upsert_profile(&a).await.unwrap();

        let hits = store
            .find_profiles_by_embedding("ansel", &[1.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits[0].0.image_ref, "ref/a.jpg");
        assert_eq!(hits[1].0.image_ref, "ref/b.jpg");
    }
}
