//! Portico: one request contract in front of many upstream providers, with
//! shared caching, single-flight population and per-provider failure
//! isolation.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod provider;
pub mod resilience;

pub(crate) mod util;
