use serde::Serialize;

use crate::{errors::ServiceError, middleware_helpers::RetryPolicy};

// Accounts and administration
pub mod accounts;

// Catalog and stock
pub mod catalog;
pub mod inventory;

// Shopping
pub mod cart;
pub mod promotions;
pub mod wishlist;

// Checkout and settlement
pub mod orders;
pub mod payments;

// Reporting
pub mod reports;

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

/// Retries operations that lost an optimistic-concurrency race
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnConcurrentModification;

impl RetryPolicy<ServiceError> for RetryOnConcurrentModification {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        matches!(error, ServiceError::ConcurrentModification(_))
    }
}
