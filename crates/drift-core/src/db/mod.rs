//! Database layer for drift

mod connection;

pub use connection::Database;
