//! Per-product status messages.
//!
//! A message is set by a cart action on one product and is shown next to
//! that product only. Success messages expire on their own: each one owns a
//! delayed clearing task that is aborted as soon as the message is replaced,
//! acknowledged, or the board is dropped. A timer that fires late never
//! erases a newer message, because it only removes the generation it was
//! scheduled for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use pestania_core::ProductId;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transient status of one product. At most one of the two is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductMessage {
    pub success: Option<String>,
    pub error: Option<String>,
}

impl ProductMessage {
    /// A success message.
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: Some(text.into()),
            error: None,
        }
    }

    /// An error message.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            success: None,
            error: Some(text.into()),
        }
    }

    /// Returns `true` if neither message is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.success.is_none() && self.error.is_none()
    }
}

/// Shared, cloneable handle to the message board.
#[derive(Clone, Default)]
pub struct ProductMessages {
    board: Arc<Mutex<Board>>,
}

#[derive(Default)]
struct Board {
    entries: HashMap<ProductId, Entry>,
    next_generation: u64,
}

struct Entry {
    message: ProductMessage,
    generation: u64,
    expiry: Option<JoinHandle<()>>,
}

impl Entry {
    fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_expiry();
        }
    }
}

impl std::fmt::Debug for ProductMessages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductMessages")
            .field("products", &self.lock().entries.len())
            .finish()
    }
}

impl ProductMessages {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current message for `product_id`; the empty message if there is none.
    #[must_use]
    pub fn get(&self, product_id: ProductId) -> ProductMessage {
        self.lock()
            .entries
            .get(&product_id)
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }

    /// All products that currently have a message.
    #[must_use]
    pub fn all(&self) -> HashMap<ProductId, ProductMessage> {
        self.lock()
            .entries
            .iter()
            .map(|(id, e)| (*id, e.message.clone()))
            .collect()
    }

    /// Remove the message for `product_id` and cancel its expiry.
    pub fn clear(&self, product_id: ProductId) {
        if let Some(mut entry) = self.lock().entries.remove(&product_id) {
            entry.cancel_expiry();
        }
    }

    /// Remove every message and cancel every pending expiry.
    pub fn reset(&self) {
        let mut board = self.lock();
        for entry in board.entries.values_mut() {
            entry.cancel_expiry();
        }
        board.entries.clear();
    }

    /// Show an error for `product_id` until it is cleared or replaced.
    pub fn set_error(&self, product_id: ProductId, text: impl Into<String>) {
        self.lock()
            .insert(product_id, ProductMessage::error(text));
    }

    /// Show a success message for `product_id` and clear it after `ttl`.
    ///
    /// Must be called from within a Tokio runtime for the expiry to be
    /// scheduled; outside one the message stays until cleared.
    pub fn set_success(&self, product_id: ProductId, text: impl Into<String>, ttl: Duration) {
        let mut board = self.lock();
        let generation = board.insert(product_id, ProductMessage::success(text));

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%product_id, "No Tokio runtime, success message will not expire");
            return;
        };

        let weak = Arc::downgrade(&self.board);
        let handle = runtime.spawn(expire(weak, product_id, generation, ttl));
        if let Some(entry) = board.entries.get_mut(&product_id) {
            entry.expiry = Some(handle);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Board {
    /// Replace the entry for `product_id`, cancelling any pending expiry.
    fn insert(&mut self, product_id: ProductId, message: ProductMessage) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let previous = self.entries.insert(
            product_id,
            Entry {
                message,
                generation,
                expiry: None,
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_expiry();
        }
        generation
    }
}

async fn expire(board: Weak<Mutex<Board>>, product_id: ProductId, generation: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;

    let Some(board) = board.upgrade() else {
        return;
    };
    let mut board = board.lock().unwrap_or_else(PoisonError::into_inner);
    if board
        .entries
        .get(&product_id)
        .is_some_and(|e| e.generation == generation)
    {
        board.entries.remove(&product_id);
        debug!(%product_id, "Product message expired");
    }
}
