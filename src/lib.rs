//! Campus BDD core library.
//!
//! Gherkin acceptance harness for the campus platform services. Feature
//! files are parsed into scenarios, each step line is dispatched through a
//! regex [`registry`] to an async handler, and handlers drive the services
//! under test over gRPC, seed fixtures in Postgres and watch the event bus
//! for the side effects they expect.

pub mod auth;
pub mod bus;
pub mod cli;
pub mod config;
pub mod connections;
pub mod context;
pub mod features;
pub mod ids;
pub mod output_mode;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod runner;
pub mod state;
pub mod status;
pub mod suites;
