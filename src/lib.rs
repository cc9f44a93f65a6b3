// Title ownership & transaction store, embedded in a game-server host.
//
// **Architecture Overview:**
// - `core/` = Business logic (host-agnostic)
// - `infra/` = Implementations of core traits (storage engines, economy backends)
// - `host/` = The seam to the host process (async boundary, lifecycle facade)
//
// The host owns the control loop, command parsing, permissions and all
// presentation. It talks to this crate through `TitleCore`: `init` once at
// startup, `drain_completions` every tick, the operation methods whenever a
// command handler needs them, and `shutdown` once on the way down.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "host/host_layer.rs"]
pub mod host;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub use crate::core::config::{
    CoreConfig, DispatcherSettings, EconomySettings, MysqlSettings, PoolSettings,
    ProviderSettings, SqliteSettings, StorageSettings,
};
pub use crate::core::economy::{EconomyError, EconomyProvider, NullEconomyProvider};
pub use crate::core::titles::{
    CacheRead, CacheUpdate, GrantOutcome, OwnershipCache, OwnershipView, PlayerLocks,
    PurchaseOutcome, RevokeOutcome, SelectionOutcome, StoreError, TitleCatalog, TitleDefinition,
    TitleService, TitleStore, TransactionAction, TransactionEntry, WriteOutcome,
};
pub use crate::host::api::TitleCore;
pub use crate::host::dispatcher::{Dispatcher, OperationHandle, SubmitError};
