//! Cart state manager.
//!
//! Keeps an in-memory snapshot of the signed-in user's cart in step with the
//! server. Every mutation goes to the server first; the local snapshot only
//! changes from server responses, never optimistically. When two operations
//! race, the snapshot reflects whichever refresh completes last.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use pestania_core::{ItemId, Money, ProductId, Quantity};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::messages::{ProductMessage, ProductMessages};
use crate::api::{
    ADD_FAILED, CLEAR_FAILED, CartApiClient, CartItem, LOAD_FAILED, REMOVE_FAILED, UPDATE_FAILED,
};
use crate::config::StorefrontConfig;
use crate::error::CartError;
use crate::session::AuthSession;

/// Shown when adding to the cart without a session.
pub const SIGN_IN_TO_ADD: &str = "You must sign in to add products to the cart";

/// Shown when changing the cart without a session.
pub const SIGN_IN_TO_MODIFY: &str = "You must sign in to modify the cart";

/// Shown next to a product after it was added.
pub const ADDED_TO_CART: &str = "Package added to the cart!";

/// Where the manager is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartStatus {
    /// No session; the cart is empty and mutations fail fast.
    Unauthenticated,
    /// A cart fetch is in flight.
    Loading,
    /// Signed in and idle.
    Ready,
}

/// Client-side view of the remote cart.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CartManager {
    inner: Arc<CartManagerInner>,
}

struct CartManagerInner {
    api: CartApiClient,
    state: RwLock<CartState>,
    messages: ProductMessages,
    message_ttl: Duration,
}

#[derive(Debug, Default)]
struct CartState {
    items: Vec<CartItem>,
    error: Option<String>,
    /// Cart fetches currently in flight.
    in_flight: usize,
    /// Bumped on sign-out so responses from the old session are dropped.
    epoch: u64,
}

impl std::fmt::Debug for CartManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("CartManager")
            .field("api", &self.inner.api)
            .field("items", &state.items.len())
            .field("error", &state.error)
            .field("loading", &(state.in_flight > 0))
            .finish_non_exhaustive()
    }
}

/// Marks a cart fetch as in flight until dropped.
struct LoadingGuard<'a> {
    state: &'a RwLock<CartState>,
    epoch: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.epoch == self.epoch {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}

impl CartManager {
    /// Create a manager on top of `api`.
    ///
    /// Authentication is read from the client's session. The cart starts
    /// empty; call [`sync_auth`](Self::sync_auth) or
    /// [`watch_auth`](Self::watch_auth) to load it.
    #[must_use]
    pub fn new(api: CartApiClient, message_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CartManagerInner {
                api,
                state: RwLock::new(CartState::default()),
                messages: ProductMessages::new(),
                message_ttl,
            }),
        }
    }

    /// Create a manager from configuration and a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured API URL cannot be used.
    pub fn from_config(
        config: &StorefrontConfig,
        session: Arc<dyn AuthSession>,
    ) -> Result<Self, CartError> {
        let api = CartApiClient::new(&config.api_url, session)?;
        Ok(Self::new(api, config.message_ttl))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The current cart snapshot, in server order.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.read().items.clone()
    }

    /// Sum of `price × quantity` over every line.
    #[must_use]
    pub fn total(&self) -> Money {
        self.read().items.iter().map(CartItem::line_total).sum()
    }

    /// Total number of units in the cart.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.read()
            .items
            .iter()
            .map(|item| u64::from(item.quantity.get()))
            .sum()
    }

    /// Whether a cart fetch is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read().in_flight > 0
    }

    /// The cart-level error, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> CartStatus {
        if !self.session().is_authenticated() {
            CartStatus::Unauthenticated
        } else if self.is_loading() {
            CartStatus::Loading
        } else {
            CartStatus::Ready
        }
    }

    /// Status message for `product_id`; empty if there is none.
    #[must_use]
    pub fn product_message(&self, product_id: ProductId) -> ProductMessage {
        self.inner.messages.get(product_id)
    }

    /// Acknowledge (clear) the status message for `product_id`.
    pub fn clear_product_message(&self, product_id: ProductId) {
        self.inner.messages.clear(product_id);
    }

    /// Clear the cart-level error.
    pub fn clear_messages(&self) {
        self.write().error = None;
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Replace the snapshot with the server's cart.
    ///
    /// On failure the previous snapshot is kept and a cart-level error is
    /// recorded. A response that arrives after a sign-out is dropped.
    ///
    /// # Errors
    ///
    /// Returns the failure that was recorded.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), CartError> {
        let epoch = self.epoch();
        self.refresh_in(epoch).await
    }

    /// Refresh on behalf of an operation started in session `epoch`.
    ///
    /// Does nothing if that session has already ended.
    async fn refresh_in(&self, epoch: u64) -> Result<(), CartError> {
        let Some(guard) = self.begin_loading(epoch) else {
            debug!("Session ended, skipping cart refresh");
            return Ok(());
        };

        match self.inner.api.get_cart().await {
            Ok(items) => {
                let mut state = self.write();
                if state.epoch == guard.epoch {
                    debug!(items = items.len(), "Cart snapshot replaced");
                    state.items = items;
                } else {
                    debug!("Discarding cart fetched for an ended session");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh cart");
                self.record_error_in(guard.epoch, e.user_message(LOAD_FAILED));
                Err(e)
            }
        }
    }

    /// Add one unit of `product_id`.
    ///
    /// # Errors
    ///
    /// See [`add_to_cart`](Self::add_to_cart).
    pub async fn add_one_to_cart(&self, product_id: ProductId) -> Result<(), CartError> {
        self.add_to_cart(product_id, Quantity::ONE).await
    }

    /// Add `quantity` units of `product_id`.
    ///
    /// On success the cart is refreshed and a success message is shown for
    /// the product until it expires. On failure the server's error is shown
    /// for the product.
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` without a session (no request is made), or the
    /// server or transport failure.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = %quantity))]
    pub async fn add_to_cart(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<(), CartError> {
        self.require_auth(SIGN_IN_TO_ADD)?;
        let epoch = self.epoch();
        self.inner.messages.clear(product_id);

        if let Err(e) = self.inner.api.add_item(product_id, quantity).await {
            warn!(error = %e, "Failed to add product to cart");
            let message = e.user_message(ADD_FAILED);
            self.in_session(epoch, || self.inner.messages.set_error(product_id, message));
            return Err(e);
        }

        // A failed refresh is recorded as a cart-level error; the add itself stands
        let _ = self.refresh_in(epoch).await;
        let shown = self.in_session(epoch, || {
            self.inner
                .messages
                .set_success(product_id, ADDED_TO_CART, self.inner.message_ttl);
        });
        if !shown {
            debug!("Session ended while adding, result discarded");
        }
        info!("Product added to cart");
        Ok(())
    }

    /// Remove `product_id` from the cart.
    ///
    /// The product is resolved to its cart item with a fresh fetch, then the
    /// item is deleted. The two steps are not atomic: if the cart changes in
    /// between, the server's not-found answer is what surfaces.
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` without a session, `ItemNotFound` if the
    /// product is not in the cart, or the server or transport failure.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_from_cart(&self, product_id: ProductId) -> Result<(), CartError> {
        self.require_auth(SIGN_IN_TO_MODIFY)?;
        let epoch = self.epoch();

        let result = async {
            let item_id = self.resolve_item(product_id).await?;
            self.inner.api.remove_item(item_id).await
        }
        .await;

        self.finish_mutation(epoch, result, REMOVE_FAILED).await
    }

    /// Set the quantity of `product_id` in the cart.
    ///
    /// Uses the same resolve-then-mutate sequence as
    /// [`remove_from_cart`](Self::remove_from_cart).
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` without a session, `ItemNotFound` if the
    /// product is not in the cart, or the server or transport failure.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = %quantity))]
    pub async fn update_quantity(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<(), CartError> {
        self.require_auth(SIGN_IN_TO_MODIFY)?;
        let epoch = self.epoch();

        let result = async {
            let item_id = self.resolve_item(product_id).await?;
            self.inner.api.update_item(item_id, quantity).await
        }
        .await;

        self.finish_mutation(epoch, result, UPDATE_FAILED).await
    }

    /// Like [`update_quantity`](Self::update_quantity), for an unchecked count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` for zero, without making a request.
    pub async fn update_quantity_raw(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), CartError> {
        self.require_auth(SIGN_IN_TO_MODIFY)?;

        let Some(quantity) = Quantity::new(quantity) else {
            let err = CartError::InvalidQuantity(quantity);
            self.record_error(err.to_string());
            return Err(err);
        };
        self.update_quantity(product_id, quantity).await
    }

    /// Empty the cart.
    ///
    /// On success the snapshot is emptied directly, without a refresh.
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` without a session, or the server or transport
    /// failure.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<(), CartError> {
        self.require_auth(SIGN_IN_TO_MODIFY)?;
        let epoch = self.epoch();

        match self.inner.api.clear().await {
            Ok(()) => {
                // Signing out empties the snapshot as well, so no epoch check
                self.write().items.clear();
                info!("Cart cleared");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear cart");
                self.record_error_in(epoch, e.user_message(CLEAR_FAILED));
                Err(e)
            }
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Bring the cart in line with the session.
    ///
    /// Signed in: the cart-level error is cleared and the cart is fetched.
    /// Signed out: the snapshot, errors, product messages and pending
    /// message timers are discarded, and responses still in flight for the
    /// old session are ignored.
    #[instrument(skip(self))]
    pub async fn sync_auth(&self) {
        if self.session().is_authenticated() {
            self.clear_messages();
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "Initial cart load failed");
            }
        } else {
            self.reset();
        }
    }

    /// Follow authentication changes published on `auth`.
    ///
    /// Syncs once immediately, then again on every change. The task ends when
    /// the sender is dropped or every clone of this manager is gone.
    #[must_use = "dropping the handle detaches the task; abort it to stop watching"]
    pub fn watch_auth(&self, mut auth: watch::Receiver<bool>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                auth.mark_unchanged();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CartManager { inner }.sync_auth().await;

                if auth.changed().await.is_err() {
                    break;
                }
            }
            debug!("Auth watcher stopped");
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn session(&self) -> &Arc<dyn AuthSession> {
        self.inner.api.session()
    }

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Mark a fetch as in flight, unless session `epoch` has ended.
    fn begin_loading(&self, epoch: u64) -> Option<LoadingGuard<'_>> {
        let mut state = self.write();
        if state.epoch != epoch {
            return None;
        }
        state.in_flight += 1;
        Some(LoadingGuard {
            state: &self.inner.state,
            epoch,
        })
    }

    /// Run `apply` only while session `epoch` is current.
    ///
    /// The state lock is held during `apply`, so a concurrent sign-out
    /// resets after it rather than being overwritten by it. `apply` must not
    /// touch the cart state itself.
    fn in_session(&self, epoch: u64, apply: impl FnOnce()) -> bool {
        let state = self.read();
        if state.epoch != epoch {
            return false;
        }
        apply();
        true
    }

    fn reset(&self) {
        {
            let mut state = self.write();
            state.items.clear();
            state.error = None;
            state.in_flight = 0;
            state.epoch += 1;
        }
        self.inner.messages.reset();
        debug!("Cart state reset");
    }

    /// Fail fast with a cart-level error when there is no session.
    fn require_auth(&self, message: &str) -> Result<(), CartError> {
        if self.session().is_authenticated() {
            return Ok(());
        }
        debug!("Cart operation attempted without a session");
        self.record_error(message.to_string());
        Err(CartError::AuthRequired(message.to_string()))
    }

    fn record_error(&self, message: String) {
        self.write().error = Some(message);
    }

    fn record_error_in(&self, epoch: u64, message: String) {
        let mut state = self.write();
        if state.epoch == epoch {
            state.error = Some(message);
        }
    }

    /// Resolve `product_id` to its cart item using a fresh server fetch.
    async fn resolve_item(&self, product_id: ProductId) -> Result<ItemId, CartError> {
        let items = self.inner.api.get_cart().await?;
        let item_id = items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.id)
            .ok_or(CartError::ItemNotFound { product_id })?;
        debug!(%product_id, %item_id, "Resolved cart item");
        Ok(item_id)
    }

    /// Refresh after a successful mutation, or record its failure.
    async fn finish_mutation(
        &self,
        epoch: u64,
        result: Result<(), CartError>,
        fallback: &str,
    ) -> Result<(), CartError> {
        match result {
            Ok(()) => {
                let _ = self.refresh_in(epoch).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Cart mutation failed");
                self.record_error_in(epoch, e.user_message(fallback));
                Err(e)
            }
        }
    }
}
