// Frameworks layer: configuration, database, and server bootstrap.

pub mod config;
pub mod db;
pub mod server;
