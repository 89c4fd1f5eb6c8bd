//! HARQ scheduler configuration management
//!
//! This crate provides configuration loading and parsing for the scheduler stack:
//! - TOML configuration file parsing
//! - Stack configuration structures and validation
//! - Simulation driver configuration

pub mod stack_config;
pub mod stack_config_sim;
pub mod toml_config;

pub use stack_config::*;
pub use toml_config::*;
