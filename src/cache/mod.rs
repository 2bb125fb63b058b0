pub mod projector;
pub mod store;

pub use projector::Projector;
pub use store::{CacheEntry, CacheRead, QueryStore};
