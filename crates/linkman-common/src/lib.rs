//! Common utilities and types shared across linkman services.
//!
//! Provides the reactive [`Property`] primitive that service crates use to
//! expose mutable state to consumers.

mod property;

pub use property::{Property, PropertyStream};
