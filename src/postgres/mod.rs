// ABOUTME: PostgreSQL connection plumbing for the analytics target
// ABOUTME: Direct, non-pooled connections opened once per sync attempt

pub mod connection;

pub use connection::connect;
