pub mod schema;
mod shape;
mod sqlite;
mod traits;

pub use shape::{LifespanField, LifespanShape, OccurrenceField, OccurrenceShape};
pub use sqlite::SqliteStore;
pub use traits::{RelationalStore, WindowQuery};
