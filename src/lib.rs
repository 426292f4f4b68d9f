//! appizap build daemon library
//!
//! This crate provides the core functionality for the build daemon:
//! - Build job model, lifecycle state machine and tracker
//! - Execution backend trait and the Docker implementation
//! - Build controller with log relay, timeouts, teardown and reaping
//! - Artifact lookup and the HTTP front end

pub mod artifact;
pub mod backend;
pub mod config;
pub mod controller;
pub mod http;
pub mod job;
pub mod relay;
pub mod tracker;
pub mod workspace;
