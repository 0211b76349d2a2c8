use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a payment method settles.
///
/// The orchestrator dispatches on this, never on a gateway name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Settlement {
    /// Collected in person (cash on delivery, pay at pickup). Stock is
    /// captured as soon as the payment starts.
    Immediate,
    /// Customer is sent to a hosted checkout; settlement arrives later via
    /// webhook or poll.
    Redirect { gateway: String },
}

/// A payment option offered at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub code: String,
    pub name: String,
    pub settlement: Settlement,
}

impl PaymentMethod {
    pub fn immediate(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            settlement: Settlement::Immediate,
        }
    }

    pub fn redirect(
        code: impl Into<String>,
        name: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            settlement: Settlement::Redirect {
                gateway: gateway.into(),
            },
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.settlement, Settlement::Immediate)
    }

    /// Gateway name for redirect methods.
    pub fn gateway(&self) -> Option<&str> {
        match &self.settlement {
            Settlement::Immediate => None,
            Settlement::Redirect { gateway } => Some(gateway),
        }
    }
}

/// The set of enabled payment methods, keyed by upper-case code.
#[derive(Debug, Clone, Default)]
pub struct PaymentMethods {
    methods: BTreeMap<String, PaymentMethod>,
}

impl PaymentMethods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cash on delivery and pay-at-pickup, the methods that need no gateway.
    pub fn in_person() -> Self {
        Self::new()
            .with(PaymentMethod::immediate("COD", "Cash on Delivery"))
            .with(PaymentMethod::immediate("PICKUP", "Pay at Pickup"))
    }

    /// Adds (or replaces) a method.
    pub fn with(mut self, mut method: PaymentMethod) -> Self {
        method.code = method.code.to_ascii_uppercase();
        self.methods.insert(method.code.clone(), method);
        self
    }

    /// Case-insensitive lookup.
    pub fn get(&self, code: &str) -> Option<&PaymentMethod> {
        self.methods.get(&code.trim().to_ascii_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaymentMethod> {
        self.methods.values()
    }
}
