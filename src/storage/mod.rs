mod api_keys;
pub mod db;
mod files;
pub mod models;
mod projects;
mod tables;
mod usage;
mod users;

pub use api_keys::API_KEY_PREFIX;
pub use db::{Database, DatabaseError};
pub use tables::*;
pub use usage::{DailyUsage, NewUsage, UsageFilter};
