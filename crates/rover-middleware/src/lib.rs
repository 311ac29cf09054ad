//! `rover-middleware` – The Nervous System
//!
//! Routes sensor snapshots, drive commands and safety flags between the
//! producers that create them and the consumers that react to them, without
//! either side knowing about the other.
//!
//! # Modules
//!
//! - [`bus`] – synchronous, topic-keyed publish/subscribe [`EventBus`] with
//!   per-handler fault isolation.

pub mod bus;

pub use bus::{EventBus, Handler, HandlerFault, SubscriptionId};
