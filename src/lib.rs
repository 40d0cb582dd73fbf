//! Concierge: a customer-support chatbot for small retail and clinic
//! businesses.
//!
//! Customers write over WhatsApp (Twilio) or a web chat widget. Cheap
//! answers come from keyword patterns and a response cache; everything else
//! goes to a language model grounded in a knowledge index and a few
//! database-backed tools. Conversations can be handed to a human agent who
//! works them from the dashboard API.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod knowledge;
pub mod providers;

pub mod chat;
pub mod payments;
pub mod whatsapp;

pub mod api;
