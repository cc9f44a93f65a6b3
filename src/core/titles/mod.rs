// Titles module - ownership, transactions and caching for display titles.

mod catalog;
mod ownership_cache;
mod title_service;

pub use catalog::{TitleCatalog, TitleDefinition};
pub use ownership_cache::{CacheRead, OwnershipCache};
pub use title_service::{
    CacheUpdate, GrantOutcome, OwnershipView, PlayerLocks, PurchaseOutcome, RevokeOutcome,
    SelectionOutcome, StoreError, TitleService, TitleStore, TransactionAction, TransactionEntry,
    WriteOutcome,
};
