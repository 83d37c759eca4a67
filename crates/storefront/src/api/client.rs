//! REST client for the storefront cart resource.
//!
//! Each method maps to exactly one HTTP request. The bearer token is read
//! from the session on every call; the client itself holds no credentials.

use std::sync::Arc;

use pestania_core::{ItemId, ProductId, Quantity};
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::types::{AddItemRequest, ApiErrorBody, CartItem, CartResponse, UpdateItemRequest};
use crate::error::CartError;
use crate::session::AuthSession;

/// Path of the cart collection, relative to the API base URL.
const CART_PATH: &str = "api/cart";

/// Longest error body excerpt written to the logs.
const LOG_BODY_LIMIT: usize = 500;

pub(crate) const LOAD_FAILED: &str = "Could not load the cart";
pub(crate) const ADD_FAILED: &str = "Could not add the product to the cart";
pub(crate) const UPDATE_FAILED: &str = "Could not update the quantity";
pub(crate) const REMOVE_FAILED: &str = "Could not remove the product from the cart";
pub(crate) const CLEAR_FAILED: &str = "Could not clear the cart";

/// Client for the `/api/cart` endpoints.
#[derive(Clone)]
pub struct CartApiClient {
    inner: Arc<CartApiClientInner>,
}

struct CartApiClientInner {
    client: Client,
    cart_url: Url,
    session: Arc<dyn AuthSession>,
}

impl std::fmt::Debug for CartApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartApiClient")
            .field("cart_url", &self.inner.cart_url.as_str())
            .finish_non_exhaustive()
    }
}

impl CartApiClient {
    /// Create a client for the API rooted at `api_url`.
    ///
    /// `api_url` should end with `/` (see [`crate::config::parse_api_url`]).
    ///
    /// # Errors
    ///
    /// Returns `CartError::Request` if the cart path cannot be joined onto `api_url`.
    pub fn new(api_url: &Url, session: Arc<dyn AuthSession>) -> Result<Self, CartError> {
        Self::with_client(Client::new(), api_url, session)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Request` if the cart path cannot be joined onto `api_url`.
    pub fn with_client(
        client: Client,
        api_url: &Url,
        session: Arc<dyn AuthSession>,
    ) -> Result<Self, CartError> {
        let cart_url = api_url
            .join(CART_PATH)
            .map_err(|e| CartError::Request(format!("invalid API URL {api_url}: {e}")))?;

        Ok(Self {
            inner: Arc::new(CartApiClientInner {
                client,
                cart_url,
                session,
            }),
        })
    }

    /// URL of the cart collection.
    #[must_use]
    pub fn cart_url(&self) -> &Url {
        &self.inner.cart_url
    }

    /// The session this client reads its credentials from.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn AuthSession> {
        &self.inner.session
    }

    /// Fetch the current cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    #[instrument(skip(self))]
    pub async fn get_cart(&self) -> Result<Vec<CartItem>, CartError> {
        let request = self.request(Method::GET, self.inner.cart_url.clone());
        let response = send(request, LOAD_FAILED).await?;
        let cart: CartResponse = decode(response).await?;
        let items = cart.into_items();
        debug!(items = items.len(), "Cart fetched");
        Ok(items)
    }

    /// Add `quantity` units of `product_id` to the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = %quantity))]
    pub async fn add_item(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<(), CartError> {
        let body = AddItemRequest {
            product_id,
            quantity,
        };
        send(
            self.request(Method::POST, self.inner.cart_url.clone()).json(&body),
            ADD_FAILED,
        )
        .await?;
        debug!("Cart item added");
        Ok(())
    }

    /// Set the quantity of cart item `item_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    #[instrument(skip(self), fields(item_id = %item_id, quantity = %quantity))]
    pub async fn update_item(&self, item_id: ItemId, quantity: Quantity) -> Result<(), CartError> {
        let body = UpdateItemRequest { quantity };
        send(
            self.request(Method::PUT, self.item_url(item_id)?).json(&body),
            UPDATE_FAILED,
        )
        .await?;
        debug!("Cart item updated");
        Ok(())
    }

    /// Delete cart item `item_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(&self, item_id: ItemId) -> Result<(), CartError> {
        send(
            self.request(Method::DELETE, self.item_url(item_id)?),
            REMOVE_FAILED,
        )
        .await?;
        debug!("Cart item removed");
        Ok(())
    }

    /// Delete every item in the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartError> {
        send(
            self.request(Method::DELETE, self.inner.cart_url.clone()),
            CLEAR_FAILED,
        )
        .await?;
        debug!("Cart cleared");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn item_url(&self, item_id: ItemId) -> Result<Url, CartError> {
        let mut url = self.inner.cart_url.clone();
        url.path_segments_mut()
            .map_err(|()| CartError::Request("cart URL cannot have path segments".to_string()))?
            .push(&item_id.to_string());
        Ok(url)
    }

    /// Start a request, attaching the bearer token if the session has one.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.inner.client.request(method, url);
        match self.inner.session.bearer_token() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }
}

/// Send a request and turn non-success statuses into `CartError::Api`.
///
/// The server's `{ "error": "..." }` text is used verbatim when present,
/// otherwise `fallback`.
async fn send(builder: RequestBuilder, fallback: &str) -> Result<Response, CartError> {
    let response = builder.send().await.map_err(|e| {
        warn!(error = %e, "Cart request failed");
        CartError::from(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(
        status = %status,
        body = %body.chars().take(LOG_BODY_LIMIT).collect::<String>(),
        "Cart API returned non-success status"
    );

    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());

    Err(CartError::Api { status, message })
}

/// Decode a JSON success body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CartError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        warn!(
            error = %e,
            body = %text.chars().take(LOG_BODY_LIMIT).collect::<String>(),
            "Failed to parse cart response"
        );
        CartError::Response(e.to_string())
    })
}
