//! Customers behind guest checkouts, identified by phone number.

use chrono::{DateTime, Utc};
use common::CustomerId;
use serde::Serialize;

use crate::order::CustomerContact;

/// A shopper. Guest checkouts are matched to an existing customer by phone;
/// the first checkout with a new phone number creates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn from_contact(contact: &CustomerContact, now: DateTime<Utc>) -> Self {
        Self {
            id: CustomerId::new(),
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Takes the checkout's email only when none is on file. Returns whether
    /// anything changed.
    pub fn fill_missing_email(&mut self, email: Option<&str>, now: DateTime<Utc>) -> bool {
        match (self.email.as_deref(), email) {
            (None, Some(email)) if !email.trim().is_empty() => {
                self.email = Some(email.trim().to_string());
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }
}
