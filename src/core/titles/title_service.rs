// Title ownership core - transaction coordination for purchases, grants,
// revokes and active-selection changes.
//
// This module is host-agnostic: it knows nothing about commands, ticks or
// scheduling. It defines the storage port, the outcome types handed back to
// callers, and the coordinator that composes the economy provider and the
// store into one logical transaction per request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::core::economy::{EconomyError, EconomyProvider};

use super::catalog::TitleCatalog;
use super::ownership_cache::OwnershipCache;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// Everything the store knows about one player's titles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipView {
    pub owned: HashSet<String>,
    /// Currently equipped title; always a member of `owned` when set.
    pub active: Option<String>,
}

impl OwnershipView {
    pub fn owns(&self, title_key: &str) -> bool {
        self.owned.contains(title_key)
    }

    pub fn count(&self) -> usize {
        self.owned.len()
    }
}

/// What kind of mutation a transaction audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    Purchase,
    Grant,
    Revoke,
    Refund,
}

impl TransactionAction {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionAction::Purchase => "purchase",
            TransactionAction::Grant => "grant",
            TransactionAction::Revoke => "revoke",
            TransactionAction::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TransactionAction::Purchase),
            "grant" => Some(TransactionAction::Grant),
            "revoke" => Some(TransactionAction::Revoke),
            "refund" => Some(TransactionAction::Refund),
            _ => None,
        }
    }
}

/// One line of the transaction audit trail.
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub player_id: Uuid,
    pub title_key: String,
    pub action: TransactionAction,
    /// Currency moved, if the action touched the economy.
    pub amount: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The bounded connection pool could not hand out a connection in time.
    #[error("connection pool timed out")]
    PoolTimeout,

    /// Failed query, lost connection, or an unexpected constraint violation.
    #[error("storage failure: {0}")]
    Failure(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// What a storage write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    /// The unique-key no-op path: the ownership row was already there.
    AlreadyExists,
    /// Revoke target row missing.
    NotFound,
    /// Active-selection target is not owned by the player.
    InvalidSelection,
}

/// Trait for persisting title ownership.
///
/// Engine choice (embedded vs. networked) is resolved once at startup and
/// never leaks past this interface: every implementation must produce
/// identical observable results for the same call sequence, and every
/// operation is safe to retry.
#[async_trait]
pub trait TitleStore: Send + Sync {
    /// Creates tables and indexes. Idempotent; implementations run it before
    /// accepting any other operation.
    async fn initialize_schema(&self) -> Result<(), StoreError>;

    async fn load_ownership(&self, player_id: Uuid) -> Result<OwnershipView, StoreError>;

    /// Inserts an ownership row. Acquiring an already-owned title reports
    /// `AlreadyExists` instead of duplicating the row.
    async fn record_purchase(
        &self,
        player_id: Uuid,
        title_key: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// Removes the ownership row and, in the same storage transaction,
    /// clears the active selection if it points at the revoked title.
    async fn revoke(&self, player_id: Uuid, title_key: &str) -> Result<WriteOutcome, StoreError>;

    /// Sets or clears the equipped title. Selecting an unowned title reports
    /// `InvalidSelection`; clearing always commits.
    async fn set_active(
        &self,
        player_id: Uuid,
        title_key: Option<&str>,
    ) -> Result<WriteOutcome, StoreError>;

    async fn log_transaction(&self, entry: TransactionEntry) -> Result<(), StoreError>;

    /// Audit trail for a player, newest first.
    async fn recent_transactions(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, StoreError>;

    /// Releases pooled connections. Called once during shutdown.
    async fn close(&self) {}
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Granted,
    /// Benign: the player already owns the title. No funds moved.
    AlreadyOwned,
    /// No such title is configured.
    UnknownTitle,
    /// The title exists but is not for sale.
    NotPurchasable,
    InsufficientFunds,
    /// No economy backend, or the backend call failed before funds moved.
    ProviderUnavailable,
    StorageFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyOwned,
    UnknownTitle,
    StorageFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NotOwned,
    StorageFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Applied,
    /// The player does not own the requested title.
    InvalidSelection,
    StorageFailure,
}

// ============================================================================
// CACHE UPDATES
// ============================================================================

/// Cache mutation produced by a coordinator operation.
///
/// The coordinator never touches the cache itself: updates are carried back
/// across the async boundary and applied on the host execution context, so
/// no other component ever observes a half-applied mutation.
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    Grant {
        player_id: Uuid,
        title_key: String,
    },
    Revoke {
        player_id: Uuid,
        title_key: String,
    },
    Active {
        player_id: Uuid,
        title_key: Option<String>,
    },
    /// Publishes a freshly loaded view for a pending load.
    Fill {
        player_id: Uuid,
        view: OwnershipView,
    },
    /// Clears a pending load marker after a failed load so a later read can
    /// retry.
    AbortLoad {
        player_id: Uuid,
    },
}

impl CacheUpdate {
    pub fn apply(self, cache: &OwnershipCache) {
        match self {
            CacheUpdate::Grant {
                player_id,
                title_key,
            } => cache.apply_grant(player_id, &title_key),
            CacheUpdate::Revoke {
                player_id,
                title_key,
            } => cache.apply_revoke(player_id, &title_key),
            CacheUpdate::Active {
                player_id,
                title_key,
            } => cache.apply_active(player_id, title_key.as_deref()),
            CacheUpdate::Fill { player_id, view } => cache.complete_load(player_id, view),
            CacheUpdate::AbortLoad { player_id } => cache.abort_load(player_id),
        }
    }
}

// ============================================================================
// PER-PLAYER LOCKS
// ============================================================================

/// Keyed mutual exclusion: one lock per player identity, created on demand.
///
/// Holding the key for the duration of withdraw + persist is what prevents
/// two concurrent purchases of the same title from both passing the
/// ownership check. Different players never contend with each other.
#[derive(Default)]
pub struct PlayerLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PlayerLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub async fn acquire(&self, player_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(player_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drops the entry for a departed player. An in-flight guard keeps its
    /// mutex alive through the `Arc` until the transaction finishes.
    pub fn forget(&self, player_id: Uuid) {
        self.locks.remove(&player_id);
    }
}

// ============================================================================
// TRANSACTION COORDINATOR
// ============================================================================

/// Orchestrates purchase, grant, revoke and selection changes against the
/// store and the economy provider.
pub struct TitleService {
    store: Arc<dyn TitleStore>,
    provider: Arc<dyn EconomyProvider>,
    catalog: Arc<TitleCatalog>,
    locks: PlayerLocks,
}

impl TitleService {
    pub fn new(
        store: Arc<dyn TitleStore>,
        provider: Arc<dyn EconomyProvider>,
        catalog: Arc<TitleCatalog>,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
            locks: PlayerLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TitleStore> {
        &self.store
    }

    pub fn catalog(&self) -> &TitleCatalog {
        &self.catalog
    }

    pub fn locks(&self) -> &PlayerLocks {
        &self.locks
    }

    /// Buys a title: ownership check, withdraw, persist, in that order.
    ///
    /// Withdraw happens strictly before the persistence write; if the write
    /// fails afterwards the coordinator deposits the same amount back and
    /// reports `StorageFailure`. A purchase never silently loses money.
    pub async fn purchase(
        &self,
        player_id: Uuid,
        title_key: &str,
    ) -> (PurchaseOutcome, Vec<CacheUpdate>) {
        let Some(definition) = self.catalog.get(title_key) else {
            return (PurchaseOutcome::UnknownTitle, Vec::new());
        };
        let Some(cost) = definition.purchase_cost() else {
            return (PurchaseOutcome::NotPurchasable, Vec::new());
        };

        let _guard = self.locks.acquire(player_id).await;

        // Ownership check under the lock, straight from the store: another
        // cluster node may have granted the title since the cache was filled.
        let owned = match self.store.load_ownership(player_id).await {
            Ok(view) => view.owns(title_key),
            Err(e) => {
                tracing::warn!(player = %player_id, title = title_key, error = %e,
                    "ownership check failed");
                return (PurchaseOutcome::StorageFailure, Vec::new());
            }
        };
        if owned {
            return (PurchaseOutcome::AlreadyOwned, Vec::new());
        }

        match self.provider.withdraw(player_id, cost).await {
            Ok(()) => {}
            Err(EconomyError::InsufficientFunds) => {
                return (PurchaseOutcome::InsufficientFunds, Vec::new());
            }
            Err(EconomyError::Unavailable) => {
                return (PurchaseOutcome::ProviderUnavailable, Vec::new());
            }
            Err(EconomyError::Provider(message)) => {
                tracing::warn!(player = %player_id, title = title_key, error = %message,
                    "economy withdraw failed");
                return (PurchaseOutcome::ProviderUnavailable, Vec::new());
            }
        }

        match self.store.record_purchase(player_id, title_key).await {
            Ok(WriteOutcome::Committed) => {
                self.audit(player_id, title_key, TransactionAction::Purchase, Some(cost))
                    .await;
                (
                    PurchaseOutcome::Granted,
                    vec![CacheUpdate::Grant {
                        player_id,
                        title_key: title_key.to_string(),
                    }],
                )
            }
            Ok(WriteOutcome::AlreadyExists) => {
                // A redelivered request slipped past the check; give the
                // money back and report the benign outcome.
                self.refund(player_id, title_key, cost).await;
                (PurchaseOutcome::AlreadyOwned, Vec::new())
            }
            Ok(other) => {
                tracing::error!(player = %player_id, title = title_key, ?other,
                    "unexpected write outcome from record_purchase");
                self.refund(player_id, title_key, cost).await;
                (PurchaseOutcome::StorageFailure, Vec::new())
            }
            Err(e) => {
                tracing::warn!(player = %player_id, title = title_key, error = %e,
                    "persisting purchase after withdraw failed");
                self.refund(player_id, title_key, cost).await;
                (PurchaseOutcome::StorageFailure, Vec::new())
            }
        }
    }

    /// Administrative grant. Skips the economy entirely.
    pub async fn grant(&self, player_id: Uuid, title_key: &str) -> (GrantOutcome, Vec<CacheUpdate>) {
        if !self.catalog.contains(title_key) {
            return (GrantOutcome::UnknownTitle, Vec::new());
        }

        let _guard = self.locks.acquire(player_id).await;

        match self.store.record_purchase(player_id, title_key).await {
            Ok(WriteOutcome::Committed) => {
                self.audit(player_id, title_key, TransactionAction::Grant, None)
                    .await;
                (
                    GrantOutcome::Granted,
                    vec![CacheUpdate::Grant {
                        player_id,
                        title_key: title_key.to_string(),
                    }],
                )
            }
            Ok(_) => (GrantOutcome::AlreadyOwned, Vec::new()),
            Err(e) => {
                tracing::warn!(player = %player_id, title = title_key, error = %e,
                    "grant failed");
                (GrantOutcome::StorageFailure, Vec::new())
            }
        }
    }

    /// Removes an owned title. The store clears the active selection in the
    /// same storage transaction when it pointed at the revoked title.
    pub async fn revoke(
        &self,
        player_id: Uuid,
        title_key: &str,
    ) -> (RevokeOutcome, Vec<CacheUpdate>) {
        let _guard = self.locks.acquire(player_id).await;

        match self.store.revoke(player_id, title_key).await {
            Ok(WriteOutcome::Committed) => {
                self.audit(player_id, title_key, TransactionAction::Revoke, None)
                    .await;
                (
                    RevokeOutcome::Revoked,
                    vec![CacheUpdate::Revoke {
                        player_id,
                        title_key: title_key.to_string(),
                    }],
                )
            }
            Ok(_) => (RevokeOutcome::NotOwned, Vec::new()),
            Err(e) => {
                tracing::warn!(player = %player_id, title = title_key, error = %e,
                    "revoke failed");
                (RevokeOutcome::StorageFailure, Vec::new())
            }
        }
    }

    pub async fn set_active(
        &self,
        player_id: Uuid,
        title_key: Option<&str>,
    ) -> (SelectionOutcome, Vec<CacheUpdate>) {
        let _guard = self.locks.acquire(player_id).await;

        match self.store.set_active(player_id, title_key).await {
            Ok(WriteOutcome::Committed) => (
                SelectionOutcome::Applied,
                vec![CacheUpdate::Active {
                    player_id,
                    title_key: title_key.map(str::to_string),
                }],
            ),
            Ok(_) => (SelectionOutcome::InvalidSelection, Vec::new()),
            Err(e) => {
                tracing::warn!(player = %player_id, error = %e, "selection change failed");
                (SelectionOutcome::StorageFailure, Vec::new())
            }
        }
    }

    /// Authoritative ownership read for command handlers.
    pub async fn query(
        &self,
        player_id: Uuid,
    ) -> (Result<OwnershipView, StoreError>, Vec<CacheUpdate>) {
        // Taking the lock orders this read with in-flight mutations, so a
        // stale snapshot can never be published over a newer write.
        let _guard = self.locks.acquire(player_id).await;

        match self.store.load_ownership(player_id).await {
            Ok(view) => {
                let update = CacheUpdate::Fill {
                    player_id,
                    view: view.clone(),
                };
                (Ok(view), vec![update])
            }
            Err(e) => (Err(e), Vec::new()),
        }
    }

    /// Background cache load for a connecting player or a display miss.
    pub async fn load_for_cache(&self, player_id: Uuid) -> Vec<CacheUpdate> {
        let _guard = self.locks.acquire(player_id).await;

        match self.store.load_ownership(player_id).await {
            Ok(view) => vec![CacheUpdate::Fill { player_id, view }],
            Err(e) => {
                tracing::warn!(player = %player_id, error = %e, "background ownership load failed");
                vec![CacheUpdate::AbortLoad { player_id }]
            }
        }
    }

    pub async fn recent_transactions(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        self.store.recent_transactions(player_id, limit).await
    }

    async fn refund(&self, player_id: Uuid, title_key: &str, amount: i64) {
        match self.provider.deposit(player_id, amount).await {
            Ok(()) => {
                self.audit(player_id, title_key, TransactionAction::Refund, Some(amount))
                    .await;
            }
            Err(e) => {
                // The money is gone and the title was not granted. Refunds
                // are not retried; leave enough context for manual
                // reconciliation.
                tracing::error!(player = %player_id, title = title_key, amount, error = %e,
                    "compensating refund failed; balance needs manual reconciliation");
            }
        }
    }

    async fn audit(
        &self,
        player_id: Uuid,
        title_key: &str,
        action: TransactionAction,
        amount: Option<i64>,
    ) {
        let entry = TransactionEntry {
            player_id,
            title_key: title_key.to_string(),
            action,
            amount,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.log_transaction(entry).await {
            tracing::warn!(player = %player_id, title = title_key, error = %e,
                "failed to record transaction audit entry");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
