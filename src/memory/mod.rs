pub mod history;
pub mod merge;
pub mod render;
pub mod schema;
pub mod store;

pub use history::TurnHistory;
pub use merge::ProfileUpdate;
pub use render::{EMPTY_MEMORY, render, render_summary};
pub use schema::{
    Fact, FieldValue, ImportantDate, ProfileError, ProfileField, Relationship, SCHEMA_VERSION,
    Snapshot, UserProfile,
};
pub use store::ProfileStore;
