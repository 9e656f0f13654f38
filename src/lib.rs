// ABOUTME: Library root for analytics-replicator
// ABOUTME: Replicates MongoDB operational collections into PostgreSQL analytics tables

pub mod config;
pub mod entity;
pub mod mapper;
pub mod postgres;
pub mod record;
pub mod source;
pub mod sync;
pub mod target;
pub mod utils;
pub mod verify;
