pub mod database;
pub mod error;
pub mod requests;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use requests::{NewRequest, RequestRepo};
