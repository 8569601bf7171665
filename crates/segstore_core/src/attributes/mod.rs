//! Segment attributes.
//!
//! Attributes are 128-bit ids mapped to `i64` values, with
//! [`NULL_ATTRIBUTE_VALUE`] meaning absent. They are kept in two tiers:
//! the per-segment [`AttributeCache`] and the durable [`AttributeStore`],
//! composed by the [`AttributeResolver`].

mod cache;
mod id;
mod persistent;
mod resolver;
mod store;
mod update;

pub use cache::AttributeCache;
pub use id::{AttributeId, NULL_ATTRIBUTE_VALUE};
pub use persistent::PersistentAttributeStore;
pub use resolver::AttributeResolver;
pub use store::{AttributeStore, InMemoryAttributeStore};
pub use update::{AttributeUpdate, AttributeUpdateType};
