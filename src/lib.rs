//! Mailbox Existence Verification Queue
//!
//! This library provides the job queue behind the verification gateway
//! (deduplicated enqueue, exclusive claims, result recording and stats) and
//! the worker runtime that probes provider login pages and classifies what
//! it sees.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
