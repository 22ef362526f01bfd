//! Vigil - Adaptive Rate Limiting Service
//!
//! This crate implements an in-memory, per-client admission gate that
//! tightens quotas for traffic that looks automated or hostile. It can be
//! embedded as a library or run as an Envoy-compatible global rate limit
//! service with an administrative gRPC surface.

pub mod clock;
pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
