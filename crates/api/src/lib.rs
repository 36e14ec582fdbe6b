//! HTTP boundary: configuration, BaaS clients, security headers and route guards.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
pub mod remote;
