pub mod bind;
pub mod manager;
pub mod postgres;
pub mod schema;
pub mod sql_where;

pub use manager::{DatabaseError, DatabaseManager};
pub use postgres::PostgresStore;
