//! Inventory adjuster: conditional stock decrements and their compensation.

use std::time::Duration;

use domain::ProductId;
use store::{CatalogStore, DecrementOutcome, StoreError};
use thiserror::Error;
use tokio::time::Instant;

/// A stock decrement to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decrement {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A decrement that succeeded within one checkout call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDecrement {
    pub product_id: ProductId,
    pub quantity: u32,
    compensated: bool,
}

impl AppliedDecrement {
    pub fn is_compensated(&self) -> bool {
        self.compensated
    }
}

/// The decrements applied so far in one checkout call, in application order.
///
/// Owned by the call that applies them and used to drive compensation.
/// Each entry is compensated at most once.
#[derive(Debug, Clone, Default)]
pub struct AppliedSet {
    entries: Vec<AppliedDecrement>,
}

impl AppliedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AppliedDecrement] {
        &self.entries
    }

    /// Entries that still hold stock and have not been restored.
    pub fn pending(&self) -> impl Iterator<Item = &AppliedDecrement> {
        self.entries.iter().filter(|e| !e.compensated)
    }

    /// Returns true once every entry has been restored.
    pub fn is_fully_compensated(&self) -> bool {
        self.pending().next().is_none()
    }

    /// Total quantity applied for a product, compensated or not.
    pub fn total_quantity_for(&self, product_id: ProductId) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.product_id == product_id)
            .map(|e| e.quantity)
            .sum()
    }

    fn record(&mut self, decrement: Decrement) {
        self.entries.push(AppliedDecrement {
            product_id: decrement.product_id,
            quantity: decrement.quantity,
            compensated: false,
        });
    }
}

/// Why `apply_decrements` stopped.
#[derive(Debug, Error)]
pub enum AdjustError {
    /// Stock was below the quantity at the moment of the write.
    #[error("Decrement of {requested} rejected for product {product_id} (available: {available})")]
    Rejected {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product disappeared between validation and the write.
    #[error("Product {0} no longer exists")]
    Missing(ProductId),

    /// The deadline passed before all lines were applied.
    #[error("Deadline exceeded after {applied} decrement(s)")]
    DeadlineExceeded { applied: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Some applied entries could not be restored.
#[derive(Debug, Error)]
#[error("Failed to restore stock for {} product(s): {last_error}", .unrestored.len())]
pub struct CompensationError {
    /// Entries still pending after every retry.
    pub unrestored: Vec<AppliedDecrement>,
    pub last_error: String,
}

const COMPENSATION_BACKOFF: Duration = Duration::from_millis(20);

/// Applies conditional stock decrements against the catalog and reverses them.
#[derive(Debug, Clone)]
pub struct InventoryAdjuster<C> {
    catalog: C,
    compensation_attempts: u32,
}

impl<C: CatalogStore> InventoryAdjuster<C> {
    /// Creates an adjuster that retries each restore up to `compensation_attempts` times.
    pub fn new(catalog: C, compensation_attempts: u32) -> Self {
        Self {
            catalog,
            compensation_attempts: compensation_attempts.max(1),
        }
    }

    /// Applies every decrement in order, stopping at the first rejection.
    ///
    /// Each success is recorded in `applied` before the next line is
    /// attempted, so on error `applied` holds exactly what must be compensated.
    pub async fn apply_decrements(
        &self,
        decrements: &[Decrement],
        applied: &mut AppliedSet,
    ) -> Result<(), AdjustError> {
        self.apply_decrements_until(decrements, applied, None).await
    }

    /// Like [`apply_decrements`](Self::apply_decrements), but gives up before
    /// starting a line once `deadline` has passed. A write already in flight
    /// is never abandoned.
    #[tracing::instrument(skip(self, decrements, applied), fields(lines = decrements.len()))]
    pub async fn apply_decrements_until(
        &self,
        decrements: &[Decrement],
        applied: &mut AppliedSet,
        deadline: Option<Instant>,
    ) -> Result<(), AdjustError> {
        for decrement in decrements {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(AdjustError::DeadlineExceeded {
                    applied: applied.len(),
                });
            }

            let outcome = self
                .catalog
                .try_decrement_stock(decrement.product_id, decrement.quantity)
                .await?;

            match outcome {
                DecrementOutcome::Applied { remaining } => {
                    applied.record(*decrement);
                    metrics::counter!("inventory_decrements_total").increment(1);
                    tracing::debug!(
                        product_id = %decrement.product_id,
                        quantity = decrement.quantity,
                        remaining,
                        "stock decremented"
                    );
                }
                DecrementOutcome::Rejected { available } => {
                    metrics::counter!("inventory_decrement_rejected_total").increment(1);
                    return Err(AdjustError::Rejected {
                        product_id: decrement.product_id,
                        requested: decrement.quantity,
                        available,
                    });
                }
                DecrementOutcome::Missing => {
                    metrics::counter!("inventory_decrement_rejected_total").increment(1);
                    return Err(AdjustError::Missing(decrement.product_id));
                }
            }
        }

        Ok(())
    }

    /// Convenience form: applies the decrements into a fresh set and returns it
    /// alongside the outcome.
    pub async fn apply_all(&self, decrements: &[Decrement]) -> (AppliedSet, Result<(), AdjustError>) {
        let mut applied = AppliedSet::new();
        let result = self.apply_decrements(decrements, &mut applied).await;
        (applied, result)
    }

    /// Restores stock for every pending entry, newest first.
    ///
    /// Restores add back the exact quantity taken. Entries already restored
    /// are skipped, so calling this twice never double-restores.
    #[tracing::instrument(skip(self, applied), fields(pending = applied.pending().count()))]
    pub async fn compensate(&self, applied: &mut AppliedSet) -> Result<(), CompensationError> {
        let mut last_error = None;

        for entry in applied.entries.iter_mut().rev() {
            if entry.compensated {
                continue;
            }

            match self.restore(entry.product_id, entry.quantity).await {
                Ok(()) => {
                    entry.compensated = true;
                    metrics::counter!("inventory_compensations_total").increment(1);
                }
                Err(e) => {
                    metrics::counter!("inventory_compensation_failures_total").increment(1);
                    tracing::error!(
                        product_id = %entry.product_id,
                        quantity = entry.quantity,
                        error = %e,
                        "stock restore failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            None => Ok(()),
            Some(last_error) => Err(CompensationError {
                unrestored: applied.pending().copied().collect(),
                last_error,
            }),
        }
    }

    async fn restore(&self, product_id: ProductId, quantity: u32) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.catalog.increment_stock(product_id, quantity).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::warn!(%product_id, quantity, "product removed before stock restore");
                    return Ok(());
                }
                Err(e) if attempt >= self.compensation_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(%product_id, attempt, error = %e, "retrying stock restore");
                    tokio::time::sleep(COMPENSATION_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
