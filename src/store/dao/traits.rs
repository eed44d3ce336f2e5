//! DAO trait definitions
//!
//! One focused trait per table family. [`super::PgStore`] implements all of
//! them against PostgreSQL and [`super::MemoryStore`] in process.

mod change;
mod health;
mod notification;
mod resource;
mod snapshot;
mod subscriber;

pub use change::ChangeDao;
pub use health::StoreHealth;
pub use notification::NotificationDao;
pub use resource::ResourceDao;
pub use snapshot::SnapshotDao;
pub use subscriber::SubscriberDirectory;
