//! Data access: trait seams plus PostgreSQL and in-memory implementations.

mod memory;
mod postgres;
mod traits;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::{
    ChangeDao, NotificationDao, ResourceDao, SnapshotDao, StoreHealth,
    SubscriberDirectory,
};
