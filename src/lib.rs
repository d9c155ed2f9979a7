//! Oracle Node Request Coordinator
//!
//! Watches a request-response contract for data requests addressed to this
//! node, calls the HTTP APIs described by its OIS documents, and settles the
//! requests on-chain.

pub mod app_state;
pub mod chain;
pub mod codec;
pub mod config;
pub mod handlers;
pub mod models;
pub mod retry;
pub mod routes;
pub mod services;
pub mod wallet;
