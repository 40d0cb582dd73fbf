//! Bookable services and appointments.
//!
//! Two non-cancelled bookings of the same service never overlap. The check
//! and the insert are a single `INSERT ... WHERE NOT EXISTS`, so concurrent
//! requests for one slot cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::customers::normalize_contact;
use super::{
    generate_reference, is_unique_violation, new_id, sql_limit, Store, StoreError, StoreResult,
    TIMESTAMP_FORMAT,
};

const REFERENCE_ATTEMPTS: usize = 3;

/// A bookable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    /// Record id.
    pub id: String,
    /// Service name.
    pub name: String,
    /// Longer description.
    pub description: Option<String>,
    /// Length of one appointment.
    pub duration_minutes: i64,
    /// Price in whole currency units.
    pub price: i64,
    /// Whether the service can be booked.
    pub active: bool,
}

/// Fields for a new service.
#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    /// Service name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Length of one appointment.
    pub duration_minutes: i64,
    /// Price in whole currency units.
    pub price: i64,
}

/// Booking lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    /// Requested, awaiting confirmation.
    Pending,
    /// Confirmed by staff.
    Confirmed,
    /// The appointment took place.
    Completed,
    /// Cancelled; the slot is free again.
    Cancelled,
}

impl BookingStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from text, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(StoreError::invalid_enum("booking status", s)),
        }
    }
}

/// An appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    /// Record id.
    pub id: String,
    /// Public reference, `BKG-YYYYMMDD-XXXX`.
    pub booking_number: String,
    /// Booking customer.
    pub customer_id: String,
    /// Booked service.
    pub service_id: String,
    /// Service name.
    pub service_name: String,
    /// Start, UTC, `YYYY-MM-DD HH:MM:SS`.
    pub starts_at: String,
    /// End, UTC, `YYYY-MM-DD HH:MM:SS`.
    pub ends_at: String,
    /// Lifecycle state.
    pub status: BookingStatus,
    /// Customer notes.
    pub notes: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

type ServiceRow = (String, String, Option<String>, i64, i64, bool);
type BookingRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
);

const SERVICE_COLUMNS: &str = "id, name, description, duration_minutes, price, active";
const BOOKING_SELECT: &str = "SELECT b.id, b.booking_number, b.customer_id, b.service_id, \
     s.name, b.starts_at, b.ends_at, b.status, b.notes, b.created_at \
     FROM bookings b JOIN services s ON s.id = b.service_id";

fn service_from_row(row: ServiceRow) -> Service {
    let (id, name, description, duration_minutes, price, active) = row;
    Service {
        id,
        name,
        description,
        duration_minutes,
        price,
        active,
    }
}

fn booking_from_row(row: BookingRow) -> StoreResult<Booking> {
    let (
        id,
        booking_number,
        customer_id,
        service_id,
        service_name,
        starts_at,
        ends_at,
        status,
        notes,
        created_at,
    ) = row;
    Ok(Booking {
        id,
        booking_number,
        customer_id,
        service_id,
        service_name,
        starts_at,
        ends_at,
        status: BookingStatus::parse(&status)?,
        notes,
        created_at,
    })
}

impl Store {
    /// Bookable services by name; inactive ones only when asked for.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_services(&self, include_inactive: bool) -> StoreResult<Vec<Service>> {
        let rows: Vec<ServiceRow> = sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE ?1 OR active = 1 ORDER BY name"
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(service_from_row).collect())
    }

    /// Look up a service by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such service exists.
    pub async fn service(&self, id: &str) -> StoreResult<Service> {
        let row: Option<ServiceRow> = sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(service_from_row)
            .ok_or_else(|| StoreError::not_found("service", id))
    }

    /// Add a bookable service.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a blank name, a non-positive
    /// duration or a negative price.
    pub async fn create_service(&self, service: &NewService) -> StoreResult<Service> {
        if service.name.trim().is_empty() || service.duration_minutes <= 0 || service.price < 0 {
            return Err(StoreError::Validation(
                "service needs a name, a positive duration and a non-negative price".into(),
            ));
        }
        let row: ServiceRow = sqlx::query_as(&format!(
            "INSERT INTO services (id, name, description, duration_minutes, price) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(new_id())
        .bind(service.name.trim())
        .bind(&service.description)
        .bind(service.duration_minutes)
        .bind(service.price)
        .fetch_one(&self.pool)
        .await?;
        Ok(service_from_row(row))
    }

    /// Book `service_id` for a customer starting at `starts_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for times not after `now` or an
    /// inactive service and [`StoreError::SlotUnavailable`] when the slot
    /// overlaps another non-cancelled booking of the same service.
    pub async fn create_booking(
        &self,
        customer_id: &str,
        service_id: &str,
        starts_at: DateTime<Utc>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Booking> {
        let service = self.service(service_id).await?;
        if !service.active {
            return Err(StoreError::Validation(format!(
                "service {} is not available for booking",
                service.name
            )));
        }
        if starts_at <= now {
            return Err(StoreError::Validation(
                "booking time must be in the future".into(),
            ));
        }
        let ends_at = Duration::try_minutes(service.duration_minutes)
            .and_then(|length| starts_at.checked_add_signed(length))
            .ok_or_else(|| StoreError::Validation("booking time is out of range".into()))?;
        let starts = starts_at.format(TIMESTAMP_FORMAT).to_string();
        let ends = ends_at.format(TIMESTAMP_FORMAT).to_string();
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());

        let id = new_id();
        for _ in 0..REFERENCE_ATTEMPTS {
            let booking_number = generate_reference("BKG", now);
            let inserted = sqlx::query(
                "INSERT INTO bookings \
                    (id, booking_number, customer_id, service_id, starts_at, ends_at, notes) \
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7 \
                 WHERE NOT EXISTS ( \
                    SELECT 1 FROM bookings WHERE service_id = ?4 AND status != 'CANCELLED' \
                    AND starts_at < ?6 AND ends_at > ?5)",
            )
            .bind(&id)
            .bind(&booking_number)
            .bind(customer_id)
            .bind(service_id)
            .bind(&starts)
            .bind(&ends)
            .bind(notes)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(result) if result.rows_affected() == 0 => return Err(StoreError::SlotUnavailable),
                Ok(_) => {
                    info!(booking_number = %booking_number, service = %service.name, "booking created");
                    return self.booking_by_number(&booking_number).await;
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Validation(
            "could not allocate a booking number".into(),
        ))
    }

    /// Look up a booking by its public number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such booking exists.
    pub async fn booking_by_number(&self, booking_number: &str) -> StoreResult<Booking> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "{BOOKING_SELECT} WHERE b.booking_number = ?1 COLLATE NOCASE"
        ))
        .bind(booking_number.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(booking_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("booking", booking_number))
    }

    /// Look up a booking on behalf of a customer identified by contact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the booking does not exist or
    /// belongs to someone else.
    pub async fn booking_for_contact(
        &self,
        booking_number: &str,
        contact: &str,
    ) -> StoreResult<Booking> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "{BOOKING_SELECT} JOIN customers c ON c.id = b.customer_id \
             WHERE b.booking_number = ?1 COLLATE NOCASE AND c.phone = ?2"
        ))
        .bind(booking_number.trim())
        .bind(normalize_contact(contact))
        .fetch_optional(&self.pool)
        .await?;
        row.map(booking_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("booking", booking_number))
    }

    /// A customer's bookings, soonest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn bookings_for_customer(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{BOOKING_SELECT} WHERE b.customer_id = ?1 ORDER BY b.starts_at LIMIT ?2"
        ))
        .bind(customer_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(booking_from_row).collect()
    }

    /// Cancel a booking that is still `PENDING` or `CONFIRMED`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] for completed or already
    /// cancelled bookings.
    pub async fn cancel_booking(&self, booking_number: &str) -> StoreResult<Booking> {
        self.move_booking(
            booking_number,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::Cancelled,
        )
        .await
    }

    /// Staff status change: `PENDING -> CONFIRMED -> COMPLETED`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] for any other move.
    pub async fn set_booking_status(
        &self,
        booking_number: &str,
        to: BookingStatus,
    ) -> StoreResult<Booking> {
        let from: &[BookingStatus] = match to {
            BookingStatus::Confirmed => &[BookingStatus::Pending],
            BookingStatus::Completed => &[BookingStatus::Confirmed],
            BookingStatus::Cancelled => &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::Pending => &[],
        };
        self.move_booking(booking_number, from, to).await
    }

    async fn move_booking(
        &self,
        booking_number: &str,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<Booking> {
        let current = self.booking_by_number(booking_number).await?;
        let invalid = || StoreError::InvalidTransition {
            entity: "booking",
            from: current.status.as_str().to_owned(),
            to: to.as_str().to_owned(),
        };
        if !from.contains(&current.status) {
            return Err(invalid());
        }
        let result = sqlx::query(
            "UPDATE bookings SET status = ?2, updated_at = datetime('now') \
             WHERE id = ?1 AND status = ?3",
        )
        .bind(&current.id)
        .bind(to.as_str())
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(invalid());
        }
        info!(booking_number = %current.booking_number, status = to.as_str(), "booking updated");
        self.booking_by_number(&current.booking_number).await
    }
}
