//! Database layer for fieldsync

mod connection;
mod kv_repository;
mod migrations;

pub use connection::Database;
pub use kv_repository::{KvRepository, LibSqlKvRepository};
