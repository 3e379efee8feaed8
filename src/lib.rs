//! # pagewatch-rs
//!
//! Postgres-backed change-tracking pipeline for monitored web pages.
//!
//! Captures flow one way: page → snapshot → diff → priority → review
//! lease → annotation. Backlogs between stages are pgmq queues; the
//! review queue hands out diffs under exclusive per-user leases.
//! External diff computation and priority scoring are pluggable seams.

pub mod config;
pub mod db;
pub mod differ;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scorer;
pub mod storage;
pub mod telemetry;
