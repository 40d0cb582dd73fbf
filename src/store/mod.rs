//! Relational persistence over a SQLite pool.
//!
//! [`Store`] is the single gateway to the database. Each submodule adds the
//! operations for one group of tables as `impl Store` blocks. State-machine
//! rules (handoff claims, order cancellation, booking overlap) are enforced
//! with conditional `UPDATE`s inside transactions so the database arbitrates
//! concurrent requests.

pub mod admins;
pub mod analytics;
pub mod bookings;
pub mod conversations;
pub mod customers;
pub mod handoffs;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shipping;

use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub use self::admins::{AdminRole, AdminUser};
pub use self::analytics::{ConversationSummary, SalesSummary};
pub use self::bookings::{Booking, BookingStatus, NewService, Service};
pub use self::conversations::{
    ChatMessage, Conversation, ConversationOverview, ConversationStatus, MessageSource, Sender,
};
pub use self::customers::Customer;
pub use self::handoffs::{Handoff, HandoffRequest, HandoffStatus};
pub use self::inventory::{InventoryItem, NewInventoryItem};
pub use self::notifications::Notification;
pub use self::orders::{NewOrderItem, Order, OrderItem, OrderStatus};
pub use self::payments::{Payment, PaymentOutcome, PaymentStatus, PaymentUpdate};
pub use self::shipping::{ShippingInfo, ShippingUpdate};

/// Schema applied on every open. All statements are idempotent.
const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

/// Timestamp format matching SQLite's `datetime('now')`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Channel a customer talks to us through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// WhatsApp via Twilio.
    WhatsApp,
    /// Web chat widget.
    Web,
}

impl Channel {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Web => "web",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised channel.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "whatsapp" => Ok(Self::WhatsApp),
            "web" => Ok(Self::Web),
            other => Err(StoreError::invalid_enum("channel", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A status change that the state machine does not allow.
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Kind of record.
        entity: &'static str,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Another agent already owns the handoff.
    #[error("handoff {handoff_id} is already claimed by agent {agent_id}")]
    AlreadyClaimed {
        /// Handoff id.
        handoff_id: String,
        /// Agent that holds the claim.
        agent_id: String,
    },

    /// The acting agent is not assigned to the handoff.
    #[error("agent {agent_id} is not assigned to handoff {handoff_id}")]
    NotAssigned {
        /// Handoff id.
        handoff_id: String,
        /// Acting agent.
        agent_id: String,
    },

    /// The order is past the point where it can be cancelled.
    #[error("order {order_number} cannot be cancelled while {status}")]
    NotCancellable {
        /// Order number.
        order_number: String,
        /// Current order status.
        status: String,
    },

    /// Not enough stock to satisfy an order line.
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item SKU.
        sku: String,
        /// Quantity requested.
        requested: i64,
        /// Quantity on hand.
        available: i64,
    },

    /// The requested booking slot overlaps an existing booking.
    #[error("booking slot is not available")]
    SlotUnavailable,

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn invalid_enum(field: &'static str, value: &str) -> Self {
        Self::InvalidEnum {
            field,
            value: value.to_owned(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `url` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the database cannot be opened,
    /// or the schema fails to apply.
    pub async fn open(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "database opened");
        Ok(store)
    }

    /// Open a private in-memory database with the schema applied.
    ///
    /// Limited to one connection that never idles out, since each SQLite
    /// in-memory connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect or the schema fails.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, for ad-hoc queries in tools and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("database closed");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate a human-friendly reference like `ORD-20260118-7QKX`.
pub fn generate_reference(prefix: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("{prefix}-{}-{suffix}", now.format("%Y%m%d"))
}

/// New random record id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Map a unique-constraint violation to `true`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Clamp a `usize` limit into SQLite's integer range.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
