//! Client-side cart state.
//!
//! [`CartManager`] mirrors the server-side cart for the signed-in user and
//! exposes the derived total. [`ProductMessages`] holds the short-lived
//! per-product status shown next to catalog entries.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pestania_storefront::{cart::CartManager, config::StorefrontConfig, session::MemorySession};
//!
//! let session = Arc::new(MemorySession::new());
//! let cart = CartManager::from_config(&config, session.clone())?;
//! let _watcher = cart.watch_auth(session.subscribe());
//!
//! session.sign_in(token);
//! cart.add_to_cart(ProductId::new(42), Quantity::new(2).unwrap()).await?;
//! println!("{}", cart.total());
//! ```

mod manager;
pub mod messages;

pub use manager::{ADDED_TO_CART, CartManager, CartStatus, SIGN_IN_TO_ADD, SIGN_IN_TO_MODIFY};
pub use messages::{ProductMessage, ProductMessages};
