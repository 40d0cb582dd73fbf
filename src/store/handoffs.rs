//! Escalation of a conversation from the bot to a human agent.
//!
//! A handoff is `pending` until an agent claims it, `claimed` while that
//! agent owns the conversation and `resolved` once closed. The partial
//! unique index on `conversation_handoffs` keeps at most one open handoff
//! per conversation; the claim is a single conditional `UPDATE`, so of two
//! agents racing for the same handoff exactly one wins.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::conversations::{insert_message_in, transition_in};
use super::notifications;
use super::{
    is_unique_violation, new_id, sql_limit, AdminUser, ChatMessage, ConversationStatus,
    MessageSource, Sender, Store, StoreError, StoreResult,
};

/// Handoff lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    /// Waiting for an agent.
    Pending,
    /// Owned by an agent.
    Claimed,
    /// Closed.
    Resolved,
}

impl HandoffStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Resolved => "resolved",
        }
    }

    /// Parse from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "resolved" => Ok(Self::Resolved),
            other => Err(StoreError::invalid_enum("handoff status", other)),
        }
    }
}

/// A handoff record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    /// Record id.
    pub id: String,
    /// Escalated conversation.
    pub conversation_id: String,
    /// Why the handoff was requested.
    pub reason: String,
    /// Lifecycle state.
    pub status: HandoffStatus,
    /// Agent that holds the claim.
    pub assigned_agent_id: Option<String>,
    /// Note left when resolving.
    pub resolution_note: Option<String>,
    /// When the handoff was requested.
    pub requested_at: String,
    /// When the current claim was taken.
    pub claimed_at: Option<String>,
    /// When the handoff was resolved.
    pub resolved_at: Option<String>,
}

type HandoffRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

const HANDOFF_COLUMNS: &str = "id, conversation_id, reason, status, assigned_agent_id, \
     resolution_note, requested_at, claimed_at, resolved_at";

fn from_row(row: HandoffRow) -> StoreResult<Handoff> {
    let (
        id,
        conversation_id,
        reason,
        status,
        assigned_agent_id,
        resolution_note,
        requested_at,
        claimed_at,
        resolved_at,
    ) = row;
    Ok(Handoff {
        id,
        conversation_id,
        reason,
        status: HandoffStatus::parse(&status)?,
        assigned_agent_id,
        resolution_note,
        requested_at,
        claimed_at,
        resolved_at,
    })
}

async fn fetch_in(conn: &mut SqliteConnection, id: &str) -> StoreResult<Handoff> {
    let row: Option<HandoffRow> = sqlx::query_as(&format!(
        "SELECT {HANDOFF_COLUMNS} FROM conversation_handoffs WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(from_row)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("handoff", id))
}

async fn open_for_conversation_in(
    conn: &mut SqliteConnection,
    conversation_id: &str,
) -> StoreResult<Option<Handoff>> {
    let row: Option<HandoffRow> = sqlx::query_as(&format!(
        "SELECT {HANDOFF_COLUMNS} FROM conversation_handoffs \
         WHERE conversation_id = ?1 AND status IN ('pending', 'claimed')"
    ))
    .bind(conversation_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(from_row).transpose()
}

fn invalid(from: HandoffStatus, to: HandoffStatus) -> StoreError {
    StoreError::InvalidTransition {
        entity: "handoff",
        from: from.as_str().to_owned(),
        to: to.as_str().to_owned(),
    }
}

/// Outcome of a handoff request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    /// The open handoff.
    pub handoff: Handoff,
    /// `false` when an open handoff already existed.
    pub created: bool,
}

impl Store {
    /// Escalate a conversation to a human agent.
    ///
    /// Idempotent: if the conversation already has an open handoff it is
    /// returned unchanged. Otherwise the conversation moves to `redirected`
    /// and a dashboard notification is recorded in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the conversation is
    /// resolved and [`StoreError::NotFound`] if it does not exist.
    pub async fn request_handoff(
        &self,
        conversation_id: &str,
        reason: &str,
    ) -> StoreResult<HandoffRequest> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = open_for_conversation_in(&mut tx, conversation_id).await? {
            debug!(handoff_id = %existing.id, conversation_id, "handoff already open");
            return Ok(HandoffRequest {
                handoff: existing,
                created: false,
            });
        }

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM conversations WHERE id = ?1")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status,)) = status else {
            return Err(StoreError::not_found("conversation", conversation_id));
        };
        match ConversationStatus::parse(&status)? {
            ConversationStatus::Active => {
                transition_in(&mut tx, conversation_id, ConversationStatus::Redirected).await?;
            }
            ConversationStatus::Redirected => {}
            ConversationStatus::Resolved => {
                return Err(StoreError::InvalidTransition {
                    entity: "conversation",
                    from: status,
                    to: ConversationStatus::Redirected.as_str().to_owned(),
                });
            }
        }

        let inserted: Result<HandoffRow, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO conversation_handoffs (id, conversation_id, reason) \
             VALUES (?1, ?2, ?3) RETURNING {HANDOFF_COLUMNS}"
        ))
        .bind(new_id())
        .bind(conversation_id)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                // Lost a race with a concurrent request; hand back the winner.
                drop(tx);
                let existing = self
                    .open_handoff_for_conversation(conversation_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("handoff", conversation_id))?;
                return Ok(HandoffRequest {
                    handoff: existing,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let handoff = from_row(row)?;

        notifications::insert_in(
            &mut tx,
            "handoff",
            "Customer asked for a human agent",
            reason,
            Some(&handoff.id),
        )
        .await?;

        tx.commit().await?;
        info!(handoff_id = %handoff.id, conversation_id, "handoff requested");
        Ok(HandoffRequest {
            handoff,
            created: true,
        })
    }

    /// Claim a pending handoff for `agent`.
    ///
    /// A repeat claim by the holder is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyClaimed`] if another agent holds it and
    /// [`StoreError::InvalidTransition`] if it is resolved.
    pub async fn claim_handoff(&self, handoff_id: &str, agent: &AdminUser) -> StoreResult<Handoff> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_handoffs \
             SET status = 'claimed', assigned_agent_id = ?2, claimed_at = datetime('now') \
             WHERE id = ?1 AND status = 'pending' AND assigned_agent_id IS NULL",
        )
        .bind(handoff_id)
        .bind(&agent.id)
        .execute(&mut *tx)
        .await?;

        let handoff = fetch_in(&mut tx, handoff_id).await?;
        if result.rows_affected() == 0 {
            let holder = handoff.assigned_agent_id.clone();
            return match (handoff.status, holder) {
                (HandoffStatus::Claimed, Some(holder)) if holder == agent.id => {
                    debug!(handoff_id, agent_id = %agent.id, "handoff already held by agent");
                    Ok(handoff)
                }
                (HandoffStatus::Claimed, Some(holder)) => Err(StoreError::AlreadyClaimed {
                    handoff_id: handoff_id.to_owned(),
                    agent_id: holder,
                }),
                (status, _) => Err(invalid(status, HandoffStatus::Claimed)),
            };
        }

        insert_message_in(
            &mut tx,
            &handoff.conversation_id,
            Sender::System,
            MessageSource::System,
            &format!("{} joined the conversation.", agent.name),
            Some(&agent.id),
        )
        .await?;

        tx.commit().await?;
        info!(handoff_id, agent_id = %agent.id, "handoff claimed");
        Ok(handoff)
    }

    /// Give a claimed handoff back to the queue. Only the holder may
    /// release; the conversation stays redirected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAssigned`] if `agent` is not the holder and
    /// [`StoreError::InvalidTransition`] if the handoff is not claimed.
    pub async fn release_handoff(
        &self,
        handoff_id: &str,
        agent: &AdminUser,
    ) -> StoreResult<Handoff> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_handoffs \
             SET status = 'pending', assigned_agent_id = NULL, claimed_at = NULL \
             WHERE id = ?1 AND status = 'claimed' AND assigned_agent_id = ?2",
        )
        .bind(handoff_id)
        .bind(&agent.id)
        .execute(&mut *tx)
        .await?;

        let handoff = fetch_in(&mut tx, handoff_id).await?;
        if result.rows_affected() == 0 {
            return Err(match handoff.status {
                HandoffStatus::Claimed => StoreError::NotAssigned {
                    handoff_id: handoff_id.to_owned(),
                    agent_id: agent.id.clone(),
                },
                status => invalid(status, HandoffStatus::Pending),
            });
        }

        insert_message_in(
            &mut tx,
            &handoff.conversation_id,
            Sender::System,
            MessageSource::System,
            &format!("{} returned the conversation to the queue.", agent.name),
            Some(&agent.id),
        )
        .await?;

        tx.commit().await?;
        info!(handoff_id, agent_id = %agent.id, "handoff released");
        Ok(handoff)
    }

    /// Close a handoff and its conversation.
    ///
    /// The holder may resolve a claimed handoff; admins may resolve any open
    /// handoff, including unclaimed ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAssigned`] if `agent` may not resolve it and
    /// [`StoreError::InvalidTransition`] if it is already resolved.
    pub async fn resolve_handoff(
        &self,
        handoff_id: &str,
        agent: &AdminUser,
        note: Option<&str>,
    ) -> StoreResult<Handoff> {
        let handoff = self
            .close_handoff(
                handoff_id,
                agent,
                note,
                ConversationStatus::Resolved,
                &format!("Conversation resolved by {}.", agent.name),
            )
            .await?;
        info!(handoff_id, agent_id = %agent.id, "handoff resolved");
        Ok(handoff)
    }

    /// Close a handoff but keep the conversation going with the bot
    /// (`redirected -> active`). Same permissions as
    /// [`Store::resolve_handoff`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAssigned`] if `agent` may not close it and
    /// [`StoreError::InvalidTransition`] if it is already resolved.
    pub async fn return_to_bot(&self, handoff_id: &str, agent: &AdminUser) -> StoreResult<Handoff> {
        let handoff = self
            .close_handoff(
                handoff_id,
                agent,
                Some("returned to assistant"),
                ConversationStatus::Active,
                &format!("{} handed the conversation back to the assistant.", agent.name),
            )
            .await?;
        info!(handoff_id, agent_id = %agent.id, "handoff returned to bot");
        Ok(handoff)
    }

    async fn close_handoff(
        &self,
        handoff_id: &str,
        agent: &AdminUser,
        note: Option<&str>,
        conversation_to: ConversationStatus,
        event: &str,
    ) -> StoreResult<Handoff> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_in(&mut tx, handoff_id).await?;

        let allowed = match current.status {
            HandoffStatus::Resolved => {
                return Err(invalid(HandoffStatus::Resolved, HandoffStatus::Resolved));
            }
            HandoffStatus::Claimed => {
                agent.is_admin() || current.assigned_agent_id.as_deref() == Some(&agent.id)
            }
            HandoffStatus::Pending => agent.is_admin(),
        };
        if !allowed {
            return Err(StoreError::NotAssigned {
                handoff_id: handoff_id.to_owned(),
                agent_id: agent.id.clone(),
            });
        }

        let result = sqlx::query(
            "UPDATE conversation_handoffs \
             SET status = 'resolved', resolved_at = datetime('now'), resolution_note = ?2 \
             WHERE id = ?1 AND status = ?3",
        )
        .bind(handoff_id)
        .bind(note)
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(invalid(current.status, HandoffStatus::Resolved));
        }

        transition_in(&mut tx, &current.conversation_id, conversation_to).await?;
        insert_message_in(
            &mut tx,
            &current.conversation_id,
            Sender::System,
            MessageSource::System,
            event,
            Some(&agent.id),
        )
        .await?;

        let handoff = fetch_in(&mut tx, handoff_id).await?;
        tx.commit().await?;
        Ok(handoff)
    }

    /// Record a reply typed by an agent in the dashboard.
    ///
    /// The conversation must have an open handoff claimed by `agent`; admins
    /// may reply to any open handoff.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if the conversation is not handed
    /// off and [`StoreError::NotAssigned`] if `agent` does not hold it.
    pub async fn record_agent_reply(
        &self,
        conversation_id: &str,
        agent: &AdminUser,
        text: &str,
    ) -> StoreResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Validation("reply must not be empty".into()));
        }

        let mut tx = self.pool.begin().await?;
        let Some(handoff) = open_for_conversation_in(&mut tx, conversation_id).await? else {
            return Err(StoreError::Validation(format!(
                "conversation {conversation_id} has no open handoff"
            )));
        };
        let holds = handoff.assigned_agent_id.as_deref() == Some(&agent.id);
        if !holds && !agent.is_admin() {
            return Err(StoreError::NotAssigned {
                handoff_id: handoff.id,
                agent_id: agent.id.clone(),
            });
        }

        let message = insert_message_in(
            &mut tx,
            conversation_id,
            Sender::Agent,
            MessageSource::Agent,
            text,
            Some(&agent.id),
        )
        .await?;
        tx.commit().await?;
        Ok(message)
    }

    /// Look up a handoff by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such handoff exists.
    pub async fn handoff(&self, id: &str) -> StoreResult<Handoff> {
        let mut conn = self.pool.acquire().await?;
        fetch_in(&mut conn, id).await
    }

    /// The open handoff of a conversation, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn open_handoff_for_conversation(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Option<Handoff>> {
        let mut conn = self.pool.acquire().await?;
        open_for_conversation_in(&mut conn, conversation_id).await
    }

    /// Handoffs, oldest request first so the queue reads in order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_handoffs(
        &self,
        status: Option<HandoffStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Handoff>> {
        let rows: Vec<HandoffRow> = sqlx::query_as(&format!(
            "SELECT {HANDOFF_COLUMNS} FROM conversation_handoffs \
             WHERE ?1 IS NULL OR status = ?1 ORDER BY requested_at ASC, rowid ASC LIMIT ?2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}
