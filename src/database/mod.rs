pub mod schema;
pub mod connection;
pub mod models;
pub mod playthroughs;
pub mod backups;

pub use backups::BackupEdit;
pub use connection::*;
pub use models::*;
pub use schema::*;
