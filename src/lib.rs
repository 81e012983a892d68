pub mod api;
pub mod config;
pub mod host;
pub mod humanize;
pub mod manager;
pub mod manifest;
pub mod observability;
pub mod queue;
pub mod transfer;
pub mod worker;
