//! Cart collaborator: the checkout reads a guest cart and marks it converted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{Money, VariantId};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Price shown when the line was added; checkout reprices from the variant.
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub token: String,
    pub currency: String,
    pub lines: Vec<CartLine>,
}

/// Source of guest carts.
#[async_trait]
pub trait CartSource: Send + Sync {
    /// Loads the active cart for a guest token, if any.
    async fn load(&self, token: &str) -> Result<Option<Cart>>;

    /// Marks the cart as converted into an order; it no longer loads.
    async fn mark_converted(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct CartState {
    carts: HashMap<String, Cart>,
    converted: Vec<String>,
}

/// In-memory cart source for testing and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartSource {
    state: Arc<RwLock<CartState>>,
}

impl InMemoryCartSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores (or replaces) a cart under its token.
    pub fn put(&self, cart: Cart) {
        let mut state = self.write();
        state.converted.retain(|t| t != &cart.token);
        state.carts.insert(cart.token.clone(), cart);
    }

    pub fn is_converted(&self, token: &str) -> bool {
        self.read().converted.iter().any(|t| t == token)
    }
}

#[async_trait]
impl CartSource for InMemoryCartSource {
    async fn load(&self, token: &str) -> Result<Option<Cart>> {
        let state = self.read();
        if state.converted.iter().any(|t| t == token) {
            return Ok(None);
        }
        Ok(state.carts.get(token).cloned())
    }

    async fn mark_converted(&self, token: &str) -> Result<()> {
        let mut state = self.write();
        if !state.converted.iter().any(|t| t == token) {
            state.converted.push(token.to_string());
        }
        Ok(())
    }
}
