//! HTTP client for Google and Kubernetes APIs

pub mod client;

pub use client::ApiClient;
