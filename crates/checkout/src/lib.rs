//! Checkout core: converts a cart (or an explicit item list) into a placed
//! order while keeping product stock consistent.
//!
//! The checkout runs these steps:
//! 1. Resolve and validate every line against the catalog
//! 2. Check stock sufficiency for all lines before mutating anything
//! 3. Apply conditional stock decrements in line order
//! 4. Snapshot names and prices into order lines
//! 5. Insert the order into the ledger
//! 6. Clear the user's cart (best effort)
//!
//! If step 3 or 5 fails, every decrement already applied in the call is
//! compensated before the error is returned.

pub mod adjuster;
pub mod cart;
pub mod engine;
pub mod error;

pub use adjuster::{AdjustError, AppliedDecrement, AppliedSet, CompensationError, Decrement, InventoryAdjuster};
pub use cart::CartService;
pub use engine::{CheckoutEngine, CheckoutSettings};
pub use error::CheckoutError;
