//! Product catalogue and stock levels.

use serde::{Deserialize, Serialize};

use super::{new_id, sql_limit, Store, StoreError, StoreResult};

/// A product with its stock on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryItem {
    /// Record id.
    pub id: String,
    /// Stock keeping unit, unique.
    pub sku: String,
    /// Product name.
    pub name: String,
    /// Longer description.
    pub description: Option<String>,
    /// Catalogue category.
    pub category: Option<String>,
    /// Unit price in whole currency units.
    pub price: i64,
    /// Units on hand.
    pub stock: i64,
    /// Last change timestamp.
    pub updated_at: String,
}

/// Fields for creating or replacing a catalogue entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInventoryItem {
    /// Stock keeping unit.
    pub sku: String,
    /// Product name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Catalogue category.
    #[serde(default)]
    pub category: Option<String>,
    /// Unit price in whole currency units.
    pub price: i64,
    /// Units on hand.
    pub stock: i64,
}

type InventoryRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    String,
);

pub(crate) const INVENTORY_COLUMNS: &str =
    "id, sku, name, description, category, price, stock, updated_at";

fn from_row(row: InventoryRow) -> InventoryItem {
    let (id, sku, name, description, category, price, stock, updated_at) = row;
    InventoryItem {
        id,
        sku,
        name,
        description,
        category,
        price,
        stock,
        updated_at,
    }
}

impl Store {
    /// The catalogue, optionally narrowed to a category, by name.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_inventory(&self, category: Option<&str>) -> StoreResult<Vec<InventoryItem>> {
        let rows: Vec<InventoryRow> = sqlx::query_as(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE ?1 IS NULL OR category = ?1 COLLATE NOCASE ORDER BY name"
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Case-insensitive substring search over name, SKU and category.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn search_inventory(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<InventoryItem>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "%{}%",
            needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows: Vec<InventoryRow> = sqlx::query_as(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE lower(name) LIKE ?1 ESCAPE '\\' OR lower(sku) LIKE ?1 ESCAPE '\\' \
                OR lower(coalesce(category, '')) LIKE ?1 ESCAPE '\\' \
             ORDER BY stock > 0 DESC, name LIMIT ?2"
        ))
        .bind(pattern)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Look up an item by SKU.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such SKU exists.
    pub async fn inventory_by_sku(&self, sku: &str) -> StoreResult<InventoryItem> {
        let row: Option<InventoryRow> = sqlx::query_as(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE sku = ?1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row)
            .ok_or_else(|| StoreError::not_found("inventory item", sku))
    }

    /// Insert a catalogue entry or replace the one with the same SKU.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a blank SKU or negative
    /// price or stock.
    pub async fn upsert_inventory(&self, item: &NewInventoryItem) -> StoreResult<InventoryItem> {
        if item.sku.trim().is_empty() || item.name.trim().is_empty() {
            return Err(StoreError::Validation(
                "inventory item needs a SKU and a name".into(),
            ));
        }
        if item.price < 0 || item.stock < 0 {
            return Err(StoreError::Validation(
                "price and stock must not be negative".into(),
            ));
        }
        let row: InventoryRow = sqlx::query_as(&format!(
            "INSERT INTO inventory (id, sku, name, description, category, price, stock) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(sku) DO UPDATE SET name = excluded.name, \
                description = excluded.description, category = excluded.category, \
                price = excluded.price, stock = excluded.stock, updated_at = datetime('now') \
             RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(new_id())
        .bind(item.sku.trim())
        .bind(item.name.trim())
        .bind(&item.description)
        .bind(&item.category)
        .bind(item.price)
        .bind(item.stock)
        .fetch_one(&self.pool)
        .await?;
        Ok(from_row(row))
    }

    /// Add `delta` (possibly negative) to an item's stock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InsufficientStock`] if the result would be
    /// negative and [`StoreError::NotFound`] for an unknown SKU.
    pub async fn adjust_stock(&self, sku: &str, delta: i64) -> StoreResult<InventoryItem> {
        let row: Option<InventoryRow> = sqlx::query_as(&format!(
            "UPDATE inventory SET stock = stock + ?2, updated_at = datetime('now') \
             WHERE sku = ?1 AND stock + ?2 >= 0 RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(sku)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(from_row(row)),
            None => {
                let current = self.inventory_by_sku(sku).await?;
                Err(StoreError::InsufficientStock {
                    sku: sku.to_owned(),
                    requested: delta.saturating_neg(),
                    available: current.stock,
                })
            }
        }
    }
}
