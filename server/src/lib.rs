pub mod admin;
pub mod broadcast;
pub mod cache;
pub mod db;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod queue;
