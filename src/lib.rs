pub mod billing;
pub mod breaker;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fraud;
pub mod handlers;
pub mod id;
pub mod models;
pub mod rate_limit;
pub mod verify;
pub mod webhook;
