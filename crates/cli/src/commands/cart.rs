//! Cart commands.
//!
//! Each invocation builds a fresh [`CartManager`], runs one operation and
//! prints the resulting snapshot. The bearer token comes from
//! `PESTANIA_TOKEN` when set, otherwise from the token file.

use std::sync::Arc;

use clap::Subcommand;
use pestania_core::{ProductId, Quantity};
use pestania_storefront::config::StorefrontConfig;
use pestania_storefront::session::{AuthSession, MemorySession, TokenFileSession};
use pestania_storefront::{CartManager, CartStatus};

use super::CliError;

#[derive(Debug, Subcommand)]
pub enum CartCommand {
    /// Show the cart contents
    Show,
    /// Add a product to the cart
    Add {
        /// Product ID
        product: ProductId,

        /// Units to add
        #[arg(short, long, default_value_t = Quantity::ONE)]
        quantity: Quantity,
    },
    /// Remove a product from the cart
    Remove {
        /// Product ID
        product: ProductId,
    },
    /// Set the quantity of a product already in the cart
    Update {
        /// Product ID
        product: ProductId,

        /// New quantity (at least 1)
        quantity: u32,
    },
    /// Empty the cart
    Clear,
    /// Print the cart total
    Total,
}

/// Run one cart command against the configured API.
///
/// # Errors
///
/// Returns an error if the session is missing or the cart operation fails.
pub async fn run(command: CartCommand, config: &StorefrontConfig) -> Result<(), CliError> {
    let cart = CartManager::from_config(config, open_session(config))?;

    match command {
        CartCommand::Show => {
            load(&cart).await?;
            print_cart(&cart);
        }
        CartCommand::Total => {
            load(&cart).await?;
            println!("{} ({} items)", cart.total(), cart.item_count());
        }
        CartCommand::Add { product, quantity } => {
            cart.add_to_cart(product, quantity).await?;
            if let Some(success) = cart.product_message(product).success {
                println!("{success}");
            }
            print_cart(&cart);
        }
        CartCommand::Remove { product } => {
            cart.remove_from_cart(product).await?;
            print_cart(&cart);
        }
        CartCommand::Update { product, quantity } => {
            cart.update_quantity_raw(product, quantity).await?;
            print_cart(&cart);
        }
        CartCommand::Clear => {
            cart.clear_cart().await?;
            println!("Cart emptied");
        }
    }

    Ok(())
}

fn open_session(config: &StorefrontConfig) -> Arc<dyn AuthSession> {
    match &config.token {
        Some(token) => Arc::new(MemorySession::signed_in(token.clone())),
        None => Arc::new(TokenFileSession::new(config.token_file.clone())),
    }
}

/// Fetch the cart, failing early without a session.
async fn load(cart: &CartManager) -> Result<(), CliError> {
    if cart.status() == CartStatus::Unauthenticated {
        return Err(CliError::NotSignedIn);
    }
    cart.refresh().await?;
    Ok(())
}

fn print_cart(cart: &CartManager) {
    let items = cart.items();
    if items.is_empty() {
        println!("Cart is empty");
    } else {
        for item in &items {
            let name = item.product.name.as_deref().unwrap_or("(unnamed)");
            println!(
                "#{:<6} {name:<32} {:>4} x {} = {}",
                item.product_id.as_i32(),
                item.quantity.get(),
                item.product.price,
                item.line_total()
            );
        }
        println!("Total: {} ({} items)", cart.total(), cart.item_count());
    }

    // A refresh that failed after a successful mutation
    if let Some(error) = cart.error() {
        println!("Warning: {error}");
    }
}
