//! Authgate - Abuse Prevention for Authentication Actions
//!
//! This crate decides whether sensitive authentication requests (password
//! reset, registration, login, OTP) may proceed. Each action carries a
//! policy of token bucket rules scoped by request dimensions such as IP or
//! hashed email; rules combine with AND semantics and the most restrictive
//! outcome wins. Bucket state lives in a bounded in-memory store with TTL
//! expiry and high-water-mark eviction.

pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;
