// Instance store adapters.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryInstanceStore;
pub use postgres::PostgresInstanceStore;
