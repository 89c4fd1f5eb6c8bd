//! Core utilities for the HARQ scheduler stack
//!
//! This crate provides fundamental types and utilities used across the workspace:
//! - Tti for subframe timing and HARQ round-trip constants
//! - Rnti terminal addressing
//! - Downlink RBG masks and uplink contiguous allocations
//! - Logging setup and warning macros

pub mod alloc;
pub mod debug;
pub mod direction;
pub mod rnti;
pub mod tti;

pub use alloc::{PrbUsage, RbgMask, UlAlloc};
pub use direction::Direction;
pub use rnti::Rnti;
pub use tti::Tti;

/// Upper bound on parallel HARQ processes per terminal and direction (FDD)
pub const MAX_HARQ_PROC: usize = 8;

/// HARQ process identifier, index into a terminal's process pool
pub type HarqPid = u32;
