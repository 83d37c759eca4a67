//! Storefront REST API client.
//!
//! # Endpoints
//!
//! | Operation   | Method | Path                 | Body                    |
//! |-------------|--------|----------------------|-------------------------|
//! | Get cart    | GET    | `/api/cart`          | -                       |
//! | Add item    | POST   | `/api/cart`          | `{productId, quantity}` |
//! | Update item | PUT    | `/api/cart/{itemId}` | `{quantity}`            |
//! | Remove item | DELETE | `/api/cart/{itemId}` | -                       |
//! | Clear cart  | DELETE | `/api/cart`          | -                       |
//!
//! Every request carries `Authorization: Bearer <token>`. Error bodies are
//! expected to look like `{ "error": "..." }`.

mod client;
pub mod types;

pub use client::CartApiClient;
pub(crate) use client::{ADD_FAILED, CLEAR_FAILED, LOAD_FAILED, REMOVE_FAILED, UPDATE_FAILED};
pub use types::{CartItem, CartProduct, CartResponse};
