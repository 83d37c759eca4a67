//! Pestania Core - Shared types library.
//!
//! This crate provides common types used across all Pestania components:
//! - `storefront` - Cart client library for the storefront REST API
//! - `cli` - Command-line front end for the cart
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients. This keeps
//! it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, quantities and money

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
