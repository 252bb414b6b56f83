//! HTTP server exposing the callable functions

pub mod handlers;
pub mod serve;
pub mod state;
