//! Advisor catalog persistence. Read-mostly: loaded at startup, queried per
//! job; changes never affect in-flight jobs.

use mondrian_protocol::Advisor;
use sqlx::Row;

use crate::error::StoreError;
use crate::store::Store;

impl Store {
    pub async fn upsert_advisor(&self, advisor: &Advisor) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(advisor)?;
        sqlx::query(
            r#"
            INSERT INTO advisors (id, record) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET record = excluded.record
            "#,
        )
        .bind(&advisor.id)
        .bind(serialized)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_advisor(&self, id: &str) -> Result<Advisor, StoreError> {
        let row = sqlx::query("SELECT record FROM advisors WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::AdvisorNotFound(id.to_string()))?;
        let advisor: Advisor = serde_json::from_str(row.get::<String, _>(0).as_str())?;
        Ok(advisor)
    }

    pub async fn list_advisors(&self) -> Result<Vec<Advisor>, StoreError> {
        let rows = sqlx::query("SELECT record FROM advisors ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        let mut advisors = Vec::with_capacity(rows.len());
        for row in rows {
            advisors.push(serde_json::from_str(row.get::<String, _>(0).as_str())?);
        }
        Ok(advisors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_advisor(id: &str) -> Advisor {
        Advisor {
            id: id.to_string(),
            name: "Ansel Adams".to_string(),
            biography: "Landscape photographer".to_string(),
            prompt: "You are a master of tonal range.".to_string(),
            focus_areas: vec!["composition".to_string(), "lighting".to_string()],
            adapter: None,
            category: Some("landscape".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_get_list() {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_advisor(&sample_advisor("ansel")).await.unwrap();
        store.upsert_advisor(&sample_advisor("dorothea")).await.unwrap();

        let advisor = store.get_advisor("ansel").await.unwrap();
        assert_eq!(advisor.name, "Ansel Adams");

        let all = store.list_advisors().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "ansel");

        let err = store.get_advisor("nobody").await.unwrap_err();
        assert!(matches!(err, StoreError::AdvisorNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_replaces() {
        let store = Store::open_in_memory().await.unwrap();
        let mut advisor = sample_advisor("ansel");
        store.upsert_advisor(&advisor).await.unwrap();

        advisor.adapter = Some("adapters/ansel-v2".to_string());
        store.upsert_advisor(&advisor).await.unwrap();

        let fetched = store.get_advisor("ansel").await.unwrap();
        assert_eq!(fetched.adapter.as_deref(), Some("adapters/ansel-v2"));
        assert_eq!(store.list_advisors().await.unwrap().len(), 1);
    }
}
