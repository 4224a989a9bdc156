//! # replikv
//!
//! An in-memory key-value server that speaks the RESP2 protocol.
//!
//! replikv stores strings with optional expiry and append-only streams with
//! blocking reads, queues commands in MULTI/EXEC transactions, loads its
//! initial keyspace from an RDB snapshot, and replicates writes from a master
//! to any number of replicas with WAIT-style acknowledgement.

pub mod command;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod glob;
pub mod keywatcher;
pub mod persistence;
pub mod replication;
pub mod resp;
pub mod server;
pub mod store;
pub mod types;
