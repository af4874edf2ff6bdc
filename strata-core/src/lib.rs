//! Strata Core
//!
//! Core library for infrastructure providers whose remote APIs finish work
//! asynchronously: a status poller, a retrier for eventual-consistency windows,
//! and the handler traits and schemas resource types are built from.

pub mod backoff;
pub mod config;
pub mod deadline;
pub mod differ;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod waiter;
