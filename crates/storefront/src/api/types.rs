//! Wire types for the storefront cart resource.

use pestania_core::{ItemId, Money, ProductId, Quantity};
use serde::{Deserialize, Serialize};

/// One line of the server-side cart.
///
/// `id` names the cart membership record; `product_id` names the catalog
/// entry. A product appears at most once per cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub product: CartProduct,
}

impl CartItem {
    /// Price × quantity for this line.
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.product.price.times(self.quantity)
    }
}

/// Catalog data embedded in a cart line.
///
/// Only `price` is required; other display fields are kept as-is in
/// `extra` so nothing the server sends is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartProduct {
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CartProduct {
    /// A product with only a price, for callers that build carts by hand.
    #[must_use]
    pub fn priced(price: Money) -> Self {
        Self {
            price,
            name: None,
            description: None,
            image: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Body of `GET /api/cart`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartResponse {
    /// Absent or `null` means an empty cart.
    #[serde(default)]
    pub items: Option<Vec<CartItem>>,
}

impl CartResponse {
    /// The items, treating a missing list as empty.
    #[must_use]
    pub fn into_items(self) -> Vec<CartItem> {
        self.items.unwrap_or_default()
    }
}

/// Body of `POST /api/cart`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Body of `PUT /api/cart/{itemId}`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UpdateItemRequest {
    pub quantity: Quantity,
}

/// Error body returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}
