//! `arbiter-middleware` – output event routing.
//!
//! Carries analysis, alert and optimization events from the engine to
//! whoever is listening (dashboards, loggers, exporters) without caring
//! about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
