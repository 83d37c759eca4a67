//! Pestania Storefront cart client.
//!
//! This crate keeps a local copy of the signed-in user's shopping cart in
//! sync with the storefront REST API.
//!
//! # Modules
//!
//! - [`api`] - `reqwest` client for the `/api/cart` endpoints
//! - [`cart`] - Cart state manager and per-product status messages
//! - [`session`] - Sources of the bearer credential
//! - [`config`] - Environment-based configuration
//! - [`error`] - Cart error type

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod session;

pub use cart::{CartManager, CartStatus, ProductMessage};
pub use error::{CartError, ErrorCategory};
