//! Foundation module - core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and the `Transform` value type
//! - Bounding volumes and view frusta
//! - Typed slot-map handles
//! - Frame timing (fixed / capped-variable timestep)
//! - Logging initialisation

pub mod math;
pub mod bounds;
pub mod collections;
pub mod time;
pub mod logging;
