//! Cross-cutting settings shared by `main` and the adapters.

pub mod config;
