//! Cart error types.
//!
//! Every failure inside the cart client ends up as a [`CartError`]. The cart
//! manager never lets one escape as a panic: it turns the error into the
//! human-readable string shown in the cart banner or next to a product.

use pestania_core::ProductId;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when working with the remote cart.
#[derive(Debug, Error)]
pub enum CartError {
    /// No authenticated session.
    #[error("{0}")]
    AuthRequired(String),

    /// The product is not in the server-side cart.
    #[error("Product {product_id} is not in the cart")]
    ItemNotFound {
        /// The product that could not be resolved to a cart item.
        product_id: ProductId,
    },

    /// The server answered with a non-success status.
    #[error("{message}")]
    Api {
        /// HTTP status returned by the server.
        status: StatusCode,
        /// Server-supplied `error` text, or the operation's fallback message.
        message: String,
    },

    /// HTTP request failed before a response arrived.
    #[error("Cart request failed: {0}")]
    Request(String),

    /// Response body could not be decoded.
    #[error("Cart response error: {0}")]
    Response(String),

    /// A cart line must hold at least one unit.
    #[error("Invalid quantity {0}: must be at least 1")]
    InvalidQuantity(u32),
}

/// Coarse classification of a [`CartError`] for callers that only care
/// about what kind of failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The caller must sign in first.
    AuthRequired,
    /// Transport failure, bad response or non-2xx status.
    NetworkOrServerFailure,
    /// The product could not be resolved to a cart item.
    ItemNotFound,
    /// The request was rejected locally before being sent.
    InvalidInput,
}

impl CartError {
    /// Classify this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthRequired(_) => ErrorCategory::AuthRequired,
            Self::ItemNotFound { .. } => ErrorCategory::ItemNotFound,
            Self::Api { .. } | Self::Request(_) | Self::Response(_) => {
                ErrorCategory::NetworkOrServerFailure
            }
            Self::InvalidQuantity(_) => ErrorCategory::InvalidInput,
        }
    }

    /// The message shown to the user.
    ///
    /// Transport and decoding details stay in the logs; the user sees the
    /// operation's generic message instead.
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Request(_) | Self::Response(_) => fallback.to_string(),
            _ => self.to_string(),
        }
    }

    /// Returns `true` if the server rejected the bearer credential.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Api { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

impl From<reqwest::Error> for CartError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Response(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
