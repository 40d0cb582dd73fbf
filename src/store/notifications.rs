//! Dashboard notifications (new handoffs, payments received).

use serde::Serialize;
use sqlx::SqliteConnection;

use super::{sql_limit, Store, StoreError, StoreResult};

/// A dashboard notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Record id.
    pub id: i64,
    /// Category, e.g. `handoff` or `payment`.
    pub kind: String,
    /// Short headline.
    pub title: String,
    /// Detail text.
    pub body: String,
    /// Id of the record the notification refers to.
    pub reference_id: Option<String>,
    /// Whether an agent has seen it.
    pub is_read: bool,
    /// Creation timestamp.
    pub created_at: String,
}

type NotificationRow = (i64, String, String, String, Option<String>, bool, String);

fn from_row(row: NotificationRow) -> Notification {
    let (id, kind, title, body, reference_id, is_read, created_at) = row;
    Notification {
        id,
        kind,
        title,
        body,
        reference_id,
        is_read,
        created_at,
    }
}

/// Insert a notification on an existing connection, so it commits with the
/// change it reports.
pub(crate) async fn insert_in(
    conn: &mut SqliteConnection,
    kind: &str,
    title: &str,
    body: &str,
    reference_id: Option<&str>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO notifications (kind, title, body, reference_id) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(kind)
    .bind(title)
    .bind(body)
    .bind(reference_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Store {
    /// Create a notification.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn create_notification(
        &self,
        kind: &str,
        title: &str,
        body: &str,
        reference_id: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_in(&mut conn, kind, title, body, reference_id).await
    }

    /// Newest notifications first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_notifications(
        &self,
        unread_only: bool,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT id, kind, title, body, reference_id, is_read, created_at \
             FROM notifications WHERE ?1 = 0 OR is_read = 0 ORDER BY id DESC LIMIT ?2",
        )
        .bind(unread_only)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Mark a notification as read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such notification exists.
    pub async fn mark_notification_read(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("notification", id.to_string()));
        }
        Ok(())
    }
}
