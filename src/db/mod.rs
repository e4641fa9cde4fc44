pub mod memory;
pub mod pool;
pub mod postgres;
pub mod queries;
pub mod schema;
pub mod store;

pub use memory::MemoryStore;
pub use pool::create_pool;
pub use postgres::PgStore;
pub use schema::ensure_schema;
pub use store::ReconcileStore;
