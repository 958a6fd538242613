//! HTTP API: webhook ingestion, Service API, Admin API.

pub mod admin;
pub mod extractors;
pub mod service;
pub mod webhook;
