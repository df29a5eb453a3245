pub mod application;
pub mod broker;
pub mod cache;
pub mod config;
pub mod domain;
pub mod ids;
pub mod infra;
mod util;
