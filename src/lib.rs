//! tg-crawler: incremental Telegram channel crawler with media downloads, in a
//! hexagonal layout (domain, ports, adapters, use cases).

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
