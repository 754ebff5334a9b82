//! Graph relationship ledger
//!
//! Append-only audit trail of structural graph edges: which operation linked
//! node A to node B, for which user, and when. Rows are soft deleted by
//! stamping `deleted_at`; nothing here ever removes a row.

use super::MetaDb;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

/// SQLite caps bound parameters per statement; stay well below it.
const MAX_IDS_PER_STATEMENT: usize = 400;

/// One ledger row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RelationshipLedgerEntry {
    pub id: String,
    pub source_node_id: String,
    pub destination_node_id: String,
    /// Name of the operation that created the edge
    pub creator_function: String,
    pub node_label: Option<String>,
    pub created_at: String,
    pub deleted_at: Option<String>,
    pub user_id: Option<String>,
}

impl RelationshipLedgerEntry {
    pub fn new(
        source_node_id: impl Into<String>,
        destination_node_id: impl Into<String>,
        creator_function: impl Into<String>,
        node_label: Option<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_node_id: source_node_id.into(),
            destination_node_id: destination_node_id.into(),
            creator_function: creator_function.into(),
            node_label,
            created_at: Utc::now().to_rfc3339(),
            deleted_at: None,
            user_id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl MetaDb {
    /// Append a ledger row
    pub async fn record_relationship(&self, entry: &RelationshipLedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_relationship_ledger (id, source_node_id, destination_node_id, creator_function, node_label, created_at, deleted_at, user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.source_node_id)
        .bind(&entry.destination_node_id)
        .bind(&entry.creator_function)
        .bind(&entry.node_label)
        .bind(&entry.created_at)
        .bind(&entry.deleted_at)
        .bind(&entry.user_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Soft delete every live row touching one of `node_ids`
    pub async fn mark_relationships_deleted(&self, node_ids: &[String]) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        mark_deleted_in(&mut conn, node_ids).await
    }

    /// Rows where the node is either endpoint, oldest first
    pub async fn ledger_entries_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<RelationshipLedgerEntry>> {
        let entries = sqlx::query_as::<_, RelationshipLedgerEntry>(
            r#"
            SELECT * FROM graph_relationship_ledger
            WHERE source_node_id = ? OR destination_node_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    /// Number of rows not yet soft deleted
    pub async fn active_ledger_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM graph_relationship_ledger WHERE deleted_at IS NULL",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}

/// Stamp `deleted_at` on live rows whose source or destination is in
/// `node_ids`, using the caller's connection (so it can join a transaction).
pub(crate) async fn mark_deleted_in(conn: &mut SqliteConnection, node_ids: &[String]) -> Result<u64> {
    let now = Utc::now().to_rfc3339();
    let mut touched = 0;

    for batch in node_ids.chunks(MAX_IDS_PER_STATEMENT) {
        let placeholders = batch.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let statement = format!(
            r#"
            UPDATE graph_relationship_ledger SET deleted_at = ?
            WHERE deleted_at IS NULL
              AND (source_node_id IN ({0}) OR destination_node_id IN ({0}))
            "#,
            placeholders
        );

        let mut query = sqlx::query(&statement).bind(&now);
        for id in batch {
            query = query.bind(id);
        }
        for id in batch {
            query = query.bind(id);
        }

        touched += query.execute(&mut *conn).await?.rows_affected();
    }

    Ok(touched)
}

#[cfg(test)]
mod tests {
    use crate::meta::tests::setup_test_db;
    use crate::meta::RelationshipLedgerEntry;

    #[tokio::test]
    async fn test_soft_delete_keeps_rows() {
        let (db, _tmp) = setup_test_db().await;

        let kept = RelationshipLedgerEntry::new("a", "b", "add_data_points", None, None);
        let touched = RelationshipLedgerEntry::new(
            "b",
            "c",
            "add_data_points",
            Some("contains".to_string()),
            Some("user-1".to_string()),
        );
        db.record_relationship(&kept).await.unwrap();
        db.record_relationship(&touched).await.unwrap();
        assert_eq!(db.active_ledger_count().await.unwrap(), 2);

        let marked = db
            .mark_relationships_deleted(&["c".to_string()])
            .await
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(db.active_ledger_count().await.unwrap(), 1);

        let rows = db.ledger_entries_for_node("c").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_deleted());

        // already deleted rows keep their first timestamp
        let first_stamp = rows[0].deleted_at.clone();
        db.mark_relationships_deleted(&["b".to_string()])
            .await
            .unwrap();
        let rows = db.ledger_entries_for_node("c").await.unwrap();
        assert_eq!(rows[0].deleted_at, first_stamp);
        assert_eq!(db.active_ledger_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_id_list_is_noop() {
        let (db, _tmp) = setup_test_db().await;
        assert_eq!(db.mark_relationships_deleted(&[]).await.unwrap(), 0);
    }
}
