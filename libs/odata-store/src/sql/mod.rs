//! SeaORM-backed store (SQLite and Postgres).

mod condition;
mod schema;
mod store;

pub use condition::{expr_to_condition, search_condition, to_sea_value};
pub use schema::create_schema;
pub use store::{SqlStore, SqlTx};
