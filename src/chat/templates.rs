//! Canned replies for pattern-matched intents and workflow events.

use crate::config::BusinessConfig;
use crate::store::{Booking, Order, OrderStatus, Service, ShippingInfo};

/// Format an amount with thousands separators, e.g. `IDR 1,250,000`.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len().saturating_add(digits.len() / 3));
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && digits.len().saturating_sub(i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{currency} {sign}{grouped}")
}

/// Hello.
pub fn greeting(business: &BusinessConfig) -> String {
    format!(
        "Hello! Welcome to {}. I can check orders, shipping and bookings, or answer \
         questions about our products and services. How can I help?",
        business.name
    )
}

/// You're welcome.
pub fn thanks() -> String {
    "You're welcome! Let me know if there is anything else I can help with.".to_owned()
}

/// Goodbye.
pub fn goodbye(business: &BusinessConfig) -> String {
    format!("Thank you for contacting {}. Have a great day!", business.name)
}

/// Opening hours.
pub fn business_hours(business: &BusinessConfig) -> String {
    format!("We are open {}.", business.opening_hours)
}

/// Address and phone.
pub fn location(business: &BusinessConfig) -> String {
    format!(
        "You can find us at {}. Phone: {}.",
        business.address, business.phone
    )
}

/// Bookable services.
pub fn services(business: &BusinessConfig, services: &[Service]) -> String {
    if services.is_empty() {
        return "We have no services open for booking right now.".to_owned();
    }
    let mut reply = String::from("Here are the services you can book:\n");
    for service in services {
        reply.push_str(&format!(
            "- {} ({} min): {}\n",
            service.name,
            service.duration_minutes,
            format_amount(service.price, &business.currency)
        ));
    }
    reply.push_str("Reply with the service and a time to make a booking.");
    reply
}

/// Acknowledgement sent when a conversation is handed to a person.
pub fn handoff_requested() -> String {
    "I've passed your conversation to our customer service team. An agent will reply \
     here shortly."
        .to_owned()
}

/// Reply when the model cannot be used.
pub fn fallback() -> String {
    "Sorry, I'm having trouble answering right now. Reply \"agent\" to talk to a member \
     of our team."
        .to_owned()
}

fn status_phrase(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "waiting for payment",
        OrderStatus::Processing => "paid and being prepared",
        OrderStatus::Shipped => "on its way",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Cancelled => "cancelled",
    }
}

/// Order status summary.
pub fn order_status(business: &BusinessConfig, order: &Order) -> String {
    let mut reply = format!(
        "Order {} is {}. Total: {}.",
        order.order_number,
        status_phrase(order.status),
        format_amount(order.total_amount, &business.currency)
    );
    for item in &order.items {
        reply.push_str(&format!("\n- {} x{}", item.name, item.quantity));
    }
    reply
}

/// No order with that number for this customer.
pub fn order_not_found(order_number: &str) -> String {
    format!(
        "I couldn't find order {order_number} for this number. Please check the order \
         number, or reply \"agent\" for help."
    )
}

/// Courier tracking.
pub fn shipping(order: &Order, tracking: Option<&ShippingInfo>) -> String {
    match tracking {
        Some(info) => {
            let mut reply = format!(
                "Order {} is with {} (tracking number {}). Status: {}.",
                order.order_number, info.courier, info.tracking_number, info.status
            );
            if let Some(location) = &info.last_location {
                reply.push_str(&format!(" Last seen: {location}."));
            }
            if let Some(eta) = &info.estimated_delivery {
                reply.push_str(&format!(" Estimated delivery: {eta}."));
            }
            reply
        }
        None => format!(
            "Order {} is {} and has not been handed to a courier yet.",
            order.order_number,
            status_phrase(order.status)
        ),
    }
}

/// Cancellation confirmed.
pub fn order_cancelled(order: &Order) -> String {
    format!(
        "Order {} has been cancelled. Any payment made will be refunded.",
        order.order_number
    )
}

/// Cancellation refused.
pub fn order_not_cancellable(order_number: &str, status: &str) -> String {
    format!(
        "Order {order_number} can no longer be cancelled because it is {}. Reply \"agent\" \
         if you need help with a return.",
        status.to_lowercase()
    )
}

/// Booking status summary.
pub fn booking_status(booking: &Booking) -> String {
    format!(
        "Booking {} for {} on {} UTC is {}.",
        booking.booking_number,
        booking.service_name,
        booking.starts_at,
        booking.status.as_str().to_lowercase()
    )
}

/// No booking with that number for this customer.
pub fn booking_not_found(booking_number: &str) -> String {
    format!("I couldn't find booking {booking_number} for this number.")
}
