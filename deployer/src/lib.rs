//! Agent Deployer Library
//!
//! Builds uploaded trading-agent sources into container images and deploys
//! them onto a Kubernetes cluster, tracking progress on the agent record.

pub mod app;
pub mod authn;
pub mod build;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod store;
pub mod target;
pub mod utils;
