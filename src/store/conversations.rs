//! Conversations and their message log.
//!
//! A customer has at most one open conversation per channel. "Open" means
//! `active` (the bot answers) or `redirected` (a human agent owns it).
//! Resolved conversations are closed for good; the next customer message
//! starts a fresh one.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use super::{is_unique_violation, new_id, sql_limit, Channel, Store, StoreError, StoreResult};

/// Conversation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// The bot answers customer messages.
    Active,
    /// Escalated to a human; the bot stays silent.
    Redirected,
    /// Closed.
    Resolved,
}

impl ConversationStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Redirected => "redirected",
            Self::Resolved => "resolved",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "redirected" => Ok(Self::Redirected),
            "resolved" => Ok(Self::Resolved),
            other => Err(StoreError::invalid_enum("conversation status", other)),
        }
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Redirected)
                | (Self::Active, Self::Resolved)
                | (Self::Redirected, Self::Resolved)
                | (Self::Redirected, Self::Active)
        )
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The customer.
    Customer,
    /// The automated assistant.
    Bot,
    /// A human agent.
    Agent,
    /// Workflow events (claims, resolutions).
    System,
}

impl Sender {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Bot => "bot",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised sender.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "customer" => Ok(Self::Customer),
            "bot" => Ok(Self::Bot),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(StoreError::invalid_enum("message sender", other)),
        }
    }
}

/// Where the content of a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// Typed by the customer.
    Customer,
    /// Templated answer from the pattern classifier.
    Pattern,
    /// Served from the response cache.
    Cache,
    /// Generated by the language model.
    Llm,
    /// Typed by a human agent.
    Agent,
    /// Workflow event.
    System,
}

impl MessageSource {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Pattern => "pattern",
            Self::Cache => "cache",
            Self::Llm => "llm",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised source.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "customer" => Ok(Self::Customer),
            "pattern" => Ok(Self::Pattern),
            "cache" => Ok(Self::Cache),
            "llm" => Ok(Self::Llm),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(StoreError::invalid_enum("message source", other)),
        }
    }
}

/// A conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    /// Record id.
    pub id: String,
    /// Owning customer.
    pub customer_id: String,
    /// Channel the conversation runs on.
    pub channel: Channel,
    /// Lifecycle state.
    pub status: ConversationStatus,
    /// Creation timestamp.
    pub created_at: String,
    /// Last activity timestamp.
    pub updated_at: String,
    /// When the conversation was resolved.
    pub resolved_at: Option<String>,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Monotonic id, usable as a polling cursor.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: String,
    /// Author.
    pub sender: Sender,
    /// Content origin.
    pub source: MessageSource,
    /// Message text.
    pub content: String,
    /// Agent that wrote the message, for agent replies.
    pub agent_id: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

/// A conversation with customer details and its latest message, for the
/// dashboard list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationOverview {
    /// The conversation itself.
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Customer contact.
    pub customer_phone: String,
    /// Customer display name.
    pub customer_name: Option<String>,
    /// Text of the most recent message.
    pub last_message: Option<String>,
    /// Number of messages in the conversation.
    pub message_count: i64,
}

type ConversationRow = (String, String, String, String, String, String, Option<String>);
type MessageRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
);

const CONVERSATION_COLUMNS: &str =
    "id, customer_id, channel, status, created_at, updated_at, resolved_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, source, content, agent_id, created_at";

fn conversation_from_row(row: ConversationRow) -> StoreResult<Conversation> {
    let (id, customer_id, channel, status, created_at, updated_at, resolved_at) = row;
    Ok(Conversation {
        id,
        customer_id,
        channel: Channel::parse(&channel)?,
        status: ConversationStatus::parse(&status)?,
        created_at,
        updated_at,
        resolved_at,
    })
}

fn message_from_row(row: MessageRow) -> StoreResult<ChatMessage> {
    let (id, conversation_id, sender, source, content, agent_id, created_at) = row;
    Ok(ChatMessage {
        id,
        conversation_id,
        sender: Sender::parse(&sender)?,
        source: MessageSource::parse(&source)?,
        content,
        agent_id,
        created_at,
    })
}

/// Move a conversation to `to` on an existing connection (used inside the
/// handoff transactions). The update is conditional on the status read, so
/// a concurrent change surfaces as [`StoreError::InvalidTransition`].
pub(crate) async fn transition_in(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    to: ConversationStatus,
) -> StoreResult<()> {
    let current: Option<(String,)> =
        sqlx::query_as("SELECT status FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .fetch_optional(&mut *conn)
            .await?;
    let Some((current,)) = current else {
        return Err(StoreError::not_found("conversation", conversation_id));
    };
    let from = ConversationStatus::parse(&current)?;
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            entity: "conversation",
            from: from.as_str().to_owned(),
            to: to.as_str().to_owned(),
        });
    }

    let result = sqlx::query(
        "UPDATE conversations SET status = ?1, updated_at = datetime('now'), \
         resolved_at = CASE WHEN ?1 = 'resolved' THEN datetime('now') ELSE NULL END \
         WHERE id = ?2 AND status = ?3",
    )
    .bind(to.as_str())
    .bind(conversation_id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::InvalidTransition {
            entity: "conversation",
            from: from.as_str().to_owned(),
            to: to.as_str().to_owned(),
        });
    }
    Ok(())
}

/// Append a message on an existing connection.
pub(crate) async fn insert_message_in(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    sender: Sender,
    source: MessageSource,
    content: &str,
    agent_id: Option<&str>,
) -> StoreResult<ChatMessage> {
    let row: MessageRow = sqlx::query_as(&format!(
        "INSERT INTO messages (conversation_id, sender, source, content, agent_id) \
         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(source.as_str())
    .bind(content)
    .bind(agent_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1")
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;

    message_from_row(row)
}

impl Store {
    /// The customer's open (active or redirected) conversation on `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn open_conversation(
        &self,
        customer_id: &str,
        channel: Channel,
    ) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE customer_id = ?1 AND channel = ?2 AND status IN ('active', 'redirected') \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(customer_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(conversation_from_row).transpose()
    }

    /// Start a new active conversation. If another open conversation on the
    /// same channel appears first, that one is returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn start_conversation(
        &self,
        customer_id: &str,
        channel: Channel,
    ) -> StoreResult<Conversation> {
        let inserted: Result<ConversationRow, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO conversations (id, customer_id, channel) VALUES (?1, ?2, ?3) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(new_id())
        .bind(customer_id)
        .bind(channel.as_str())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => conversation_from_row(row),
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    customer_id,
                    channel = channel.as_str(),
                    "conversation already started concurrently"
                );
                self.open_conversation(customer_id, channel)
                    .await?
                    .ok_or_else(|| StoreError::not_found("open conversation", customer_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The open conversation for the customer, or a newly started one.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn open_or_start_conversation(
        &self,
        customer_id: &str,
        channel: Channel,
    ) -> StoreResult<Conversation> {
        match self.open_conversation(customer_id, channel).await? {
            Some(conversation) => Ok(conversation),
            None => self.start_conversation(customer_id, channel).await,
        }
    }

    /// Look up a conversation by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such conversation exists.
    pub async fn conversation(&self, id: &str) -> StoreResult<Conversation> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(conversation_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("conversation", id))
    }

    /// Conversations for the dashboard, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: usize,
    ) -> StoreResult<Vec<ConversationOverview>> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            i64,
        )> = sqlx::query_as(
            "SELECT c.id, c.customer_id, c.channel, c.status, c.created_at, c.updated_at, \
                    c.resolved_at, cu.phone, cu.name, \
                    (SELECT m.content FROM messages m WHERE m.conversation_id = c.id \
                     ORDER BY m.id DESC LIMIT 1), \
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) \
             FROM conversations c JOIN customers cu ON cu.id = c.customer_id \
             WHERE ?1 IS NULL OR c.status = ?1 \
             ORDER BY c.updated_at DESC, c.rowid DESC LIMIT ?2",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(
                    id,
                    customer_id,
                    channel,
                    status,
                    created_at,
                    updated_at,
                    resolved_at,
                    customer_phone,
                    customer_name,
                    last_message,
                    message_count,
                )| {
                    Ok(ConversationOverview {
                        conversation: conversation_from_row((
                            id,
                            customer_id,
                            channel,
                            status,
                            created_at,
                            updated_at,
                            resolved_at,
                        ))?,
                        customer_phone,
                        customer_name,
                        last_message,
                        message_count,
                    })
                },
            )
            .collect()
    }

    /// Move a conversation to a new status, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] for a disallowed move and
    /// [`StoreError::NotFound`] for an unknown conversation.
    pub async fn transition_conversation(
        &self,
        id: &str,
        to: ConversationStatus,
    ) -> StoreResult<Conversation> {
        let mut conn = self.pool.acquire().await?;
        transition_in(&mut conn, id, to).await?;
        drop(conn);
        self.conversation(id).await
    }

    /// Append a message to a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an unknown conversation.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        source: MessageSource,
        content: &str,
        agent_id: Option<&str>,
    ) -> StoreResult<ChatMessage> {
        let mut conn = self.pool.acquire().await?;
        insert_message_in(&mut conn, conversation_id, sender, source, content, agent_id).await
    }

    /// Messages in chronological order, optionally only those after the
    /// cursor `after_id`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn messages(
        &self,
        conversation_id: &str,
        after_id: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3"
        ))
        .bind(conversation_id)
        .bind(after_id.unwrap_or(0))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    /// The latest `limit` messages, returned oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))
        .bind(conversation_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}
