pub mod api;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod presence;
pub mod progression;
