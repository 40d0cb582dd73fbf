//! Customer records keyed by contact (phone number or web session).

use serde::Serialize;

use super::{new_id, Channel, Store, StoreError, StoreResult};

/// A customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    /// Record id.
    pub id: String,
    /// Phone number in E.164 form, or `web:<session>` for anonymous web chats.
    pub phone: String,
    /// Display name, if known.
    pub name: Option<String>,
    /// Email, if known.
    pub email: Option<String>,
    /// Channel of first contact.
    pub channel: Channel,
    /// Creation timestamp.
    pub created_at: String,
}

type CustomerRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

const CUSTOMER_COLUMNS: &str = "id, phone, name, email, channel, created_at";

fn from_row(row: CustomerRow) -> StoreResult<Customer> {
    let (id, phone, name, email, channel, created_at) = row;
    Ok(Customer {
        id,
        phone,
        name,
        email,
        channel: Channel::parse(&channel)?,
        created_at,
    })
}

/// Normalise a contact identifier: strips the `whatsapp:` prefix, spaces,
/// dashes and parentheses. A leading `0` local prefix is left untouched.
pub fn normalize_contact(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed.strip_prefix("whatsapp:").unwrap_or(trimmed);
    if without_prefix.starts_with("web:") {
        return without_prefix.to_owned();
    }
    without_prefix
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

impl Store {
    /// Find a customer by contact, creating the record if needed.
    ///
    /// A known name overwrites nothing; a newly supplied name fills a blank.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an empty contact.
    pub async fn find_or_create_customer(
        &self,
        contact: &str,
        name: Option<&str>,
        channel: Channel,
    ) -> StoreResult<Customer> {
        let phone = normalize_contact(contact);
        if phone.is_empty() {
            return Err(StoreError::Validation("contact must not be empty".into()));
        }
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        sqlx::query(
            "INSERT INTO customers (id, phone, name, channel) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(phone) DO UPDATE SET \
                name = COALESCE(customers.name, excluded.name), \
                updated_at = datetime('now')",
        )
        .bind(new_id())
        .bind(&phone)
        .bind(name)
        .bind(channel.as_str())
        .execute(&self.pool)
        .await?;

        self.customer_by_phone(&phone)
            .await?
            .ok_or_else(|| StoreError::not_found("customer", phone))
    }

    /// Look up a customer by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such customer exists.
    pub async fn customer(&self, id: &str) -> StoreResult<Customer> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("customer", id))
    }

    /// Look up a customer by (normalised) contact.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn customer_by_phone(&self, contact: &str) -> StoreResult<Option<Customer>> {
        let phone = normalize_contact(contact);
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE phone = ?1"
        ))
        .bind(&phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }
}
