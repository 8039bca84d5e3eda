//! Data model of the six-table entity store, as seen by the report engine.
//!
//! Everything here is read-only to the engine: entities, dynamic attributes,
//! relationships, and transactions are owned by the external store.

mod amount;
mod entity;
mod row;
mod transaction;

pub use amount::Amount;
pub use entity::{AttributeValue, DynamicAttribute, Entity, Organization, Relationship};
pub use row::{key_string, lookup, Row};
pub use transaction::{EntrySide, Transaction, TransactionLine};
