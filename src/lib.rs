//! Turnstile - Per-Client Request Admission Control
//!
//! This crate decides, per incoming request, whether a caller still has budget
//! in its current rate limit window. State lives either in process memory or in
//! a shared counter store (Redis) so that several instances enforce one logical
//! limit. When the shared store misbehaves, admission fails open.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
