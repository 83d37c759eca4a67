//! Core types for Pestania.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod quantity;

pub use id::*;
pub use money::Money;
pub use quantity::{Quantity, QuantityError};
