pub mod config;
pub mod consumer;
pub mod event;
pub mod kafka;
pub mod metrics;
pub mod normalizer;
pub mod report;
