// TitleCore - the facade the host process talks to.
//
// This is the composition root: `init` resolves the storage engine and the
// economy provider from config, wires the coordinator, the ownership cache
// and the async boundary together, and hands the host one cheap-to-clone
// handle. Command handlers call the operation methods and await the returned
// handles; the tick loop calls `drain_completions`; display code calls
// `current_active_display` and nothing else.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::config::{CoreConfig, DispatcherSettings, StorageSettings};
use crate::core::economy::EconomyProvider;
use crate::core::titles::{
    CacheRead, CacheUpdate, GrantOutcome, OwnershipCache, OwnershipView, PurchaseOutcome,
    RevokeOutcome, SelectionOutcome, StoreError, TitleCatalog, TitleDefinition, TitleService,
    TitleStore, TransactionEntry,
};
use crate::host::dispatcher::{Dispatcher, OperationHandle};
use crate::infra::economy::resolve_provider;
use crate::infra::titles::{MySqlTitleStore, SqliteTitleStore};

#[derive(Clone)]
pub struct TitleCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    service: Arc<TitleService>,
    cache: Arc<OwnershipCache>,
    dispatcher: Dispatcher,
    catalog: Arc<TitleCatalog>,
    shutdown_timeout: Duration,
}

impl TitleCore {
    /// Brings the core up: connects the configured storage engine (running
    /// idempotent schema setup), resolves the economy provider by priority,
    /// and starts the worker pool. Called once by the host at startup.
    pub async fn init(
        config: CoreConfig,
        definitions: Vec<TitleDefinition>,
    ) -> anyhow::Result<TitleCore> {
        let catalog = Arc::new(TitleCatalog::new(definitions));

        let store: Arc<dyn TitleStore> = match &config.storage {
            StorageSettings::Sqlite(settings) => {
                Arc::new(SqliteTitleStore::new(&settings.path, &config.pool).await?)
            }
            StorageSettings::Mysql(settings) => {
                Arc::new(MySqlTitleStore::new(settings, &config.pool).await?)
            }
        };

        let provider = resolve_provider(&config.economy).await;
        tracing::info!(
            provider = provider.name(),
            titles = catalog.len(),
            "title store initialized"
        );

        Ok(Self::assemble(store, provider, catalog, &config.dispatcher))
    }

    /// Wires a core from already-built parts. Lets tests and unusual hosts
    /// supply their own store or provider.
    pub fn with_parts(
        store: Arc<dyn TitleStore>,
        provider: Arc<dyn EconomyProvider>,
        catalog: Arc<TitleCatalog>,
        settings: &DispatcherSettings,
    ) -> TitleCore {
        Self::assemble(store, provider, catalog, settings)
    }

    fn assemble(
        store: Arc<dyn TitleStore>,
        provider: Arc<dyn EconomyProvider>,
        catalog: Arc<TitleCatalog>,
        settings: &DispatcherSettings,
    ) -> TitleCore {
        let service = Arc::new(TitleService::new(store, provider, Arc::clone(&catalog)));
        TitleCore {
            inner: Arc::new(CoreInner {
                service,
                cache: Arc::new(OwnershipCache::new()),
                dispatcher: Dispatcher::new(settings.workers, settings.queue_capacity),
                catalog,
                shutdown_timeout: settings.shutdown_timeout(),
            }),
        }
    }

    /// Stops accepting work, drains the boundary with a bounded timeout and
    /// closes the storage pools. Called once by the host on the way down.
    pub async fn shutdown(&self) {
        self.inner
            .dispatcher
            .shutdown(self.inner.shutdown_timeout)
            .await;
        // Flush completions produced during the drain so pending handles
        // resolve before the pools go away.
        self.inner.dispatcher.drain_completions();
        self.inner.service.store().close().await;
        tracing::info!("title store shut down");
    }

    // ========================================================================
    // COMMAND BOUNDARY
    // ========================================================================

    pub fn purchase(&self, player_id: Uuid, title_key: &str) -> OperationHandle<PurchaseOutcome> {
        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        let title_key = title_key.to_string();
        self.submit_op(
            async move { service.purchase(player_id, &title_key).await },
            move |updates| apply_updates(&cache, updates),
            PurchaseOutcome::StorageFailure,
        )
    }

    pub fn grant(&self, player_id: Uuid, title_key: &str) -> OperationHandle<GrantOutcome> {
        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        let title_key = title_key.to_string();
        self.submit_op(
            async move { service.grant(player_id, &title_key).await },
            move |updates| apply_updates(&cache, updates),
            GrantOutcome::StorageFailure,
        )
    }

    pub fn revoke(&self, player_id: Uuid, title_key: &str) -> OperationHandle<RevokeOutcome> {
        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        let title_key = title_key.to_string();
        self.submit_op(
            async move { service.revoke(player_id, &title_key).await },
            move |updates| apply_updates(&cache, updates),
            RevokeOutcome::StorageFailure,
        )
    }

    pub fn set_active(
        &self,
        player_id: Uuid,
        title_key: Option<&str>,
    ) -> OperationHandle<SelectionOutcome> {
        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        let title_key = title_key.map(str::to_string);
        self.submit_op(
            async move { service.set_active(player_id, title_key.as_deref()).await },
            move |updates| apply_updates(&cache, updates),
            SelectionOutcome::StorageFailure,
        )
    }

    /// Authoritative ownership view, straight from storage.
    pub fn query(&self, player_id: Uuid) -> OperationHandle<Result<OwnershipView, StoreError>> {
        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        self.submit_op(
            async move { service.query(player_id).await },
            move |updates| apply_updates(&cache, updates),
            Err(StoreError::Failure("operation rejected".to_string())),
        )
    }

    /// Audit trail for a player, newest first.
    pub fn recent_transactions(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> OperationHandle<Result<Vec<TransactionEntry>, StoreError>> {
        let service = Arc::clone(&self.inner.service);
        self.submit_op(
            async move { (service.recent_transactions(player_id, limit).await, ()) },
            |_| {},
            Err(StoreError::Failure("operation rejected".to_string())),
        )
    }

    // ========================================================================
    // LIFECYCLE HOOKS & DISPLAY BOUNDARY
    // ========================================================================

    /// Pre-warms the cache for a connecting player.
    pub fn handle_connect(&self, player_id: Uuid) {
        self.schedule_load(player_id);
    }

    /// Evicts cached state for a departing player to bound memory.
    pub fn handle_disconnect(&self, player_id: Uuid) {
        self.inner.cache.invalidate(player_id);
        self.inner.service.locks().forget(player_id);
    }

    /// Synchronous, cache-only read of the equipped title's display text.
    /// Safe to call from the hottest paths; a miss schedules a background
    /// load and reports nothing equipped for now.
    pub fn current_active_display(&self, player_id: Uuid) -> Option<String> {
        match self.inner.cache.get(player_id) {
            CacheRead::Loaded(view) => {
                let key = view.active?;
                self.inner.catalog.display(&key).map(str::to_string)
            }
            CacheRead::NotLoaded => {
                self.schedule_load(player_id);
                None
            }
        }
    }

    /// Synchronous, cache-only ownership read for display-grade callers that
    /// need more than the active title. Schedules a load on a miss.
    pub fn cached_ownership(&self, player_id: Uuid) -> CacheRead {
        let read = self.inner.cache.get(player_id);
        if read == CacheRead::NotLoaded {
            self.schedule_load(player_id);
        }
        read
    }

    /// Runs queued completions on the caller's context. The host calls this
    /// once per tick.
    pub fn drain_completions(&self) -> usize {
        self.inner.dispatcher.drain_completions()
    }

    /// Alternative to per-tick draining: a dedicated task that pumps
    /// completions until shutdown.
    pub async fn run_completion_loop(&self) {
        self.inner.dispatcher.run_completion_loop().await;
    }

    fn schedule_load(&self, player_id: Uuid) {
        if !self.inner.cache.begin_load(player_id) {
            return;
        }

        let service = Arc::clone(&self.inner.service);
        let cache = Arc::clone(&self.inner.cache);
        let submitted = self.inner.dispatcher.try_submit(
            async move { ((), service.load_for_cache(player_id).await) },
            move |updates| apply_updates(&cache, updates),
            (),
        );

        if let Err(reason) = submitted {
            // Roll the marker back so a later read can retry the load.
            self.inner.cache.abort_load(player_id);
            tracing::debug!(player = %player_id, ?reason, "ownership preload rejected");
        }
    }

    fn submit_op<T, U, F, A>(&self, operation: F, apply: A, failure: T) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        U: Send + 'static,
        F: std::future::Future<Output = (T, U)> + Send + 'static,
        A: FnOnce(U) + Send + 'static,
    {
        match self
            .inner
            .dispatcher
            .try_submit(operation, apply, failure.clone())
        {
            Ok(handle) => handle,
            Err(reason) => {
                tracing::warn!(?reason, "operation rejected at the async boundary");
                OperationHandle::ready(failure)
            }
        }
    }
}

fn apply_updates(cache: &OwnershipCache, updates: Vec<CacheUpdate>) {
    for update in updates {
        update.apply(cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CoreConfig, EconomySettings, PoolSettings, SqliteSettings};
    use crate::infra::economy::WalletDbProvider;
    use crate::infra::titles::InMemoryTitleStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::task::JoinHandle;

    fn catalog() -> Arc<TitleCatalog> {
        Arc::new(TitleCatalog::new(vec![
            TitleDefinition {
                key: "vip".to_string(),
                display: "[VIP]".to_string(),
                cost: Some(500),
                purchasable: true,
            },
            TitleDefinition {
                key: "founder".to_string(),
                display: "[Founder]".to_string(),
                cost: None,
                purchasable: false,
            },
        ]))
    }

    fn spawn_pump(core: &TitleCore) -> JoinHandle<()> {
        let core = core.clone();
        tokio::spawn(async move { core.run_completion_loop().await })
    }

    async fn wallet_provider() -> WalletDbProvider {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        WalletDbProvider::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_vip_purchase_end_to_end() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let player = Uuid::new_v4();
        let provider = wallet_provider().await;
        provider.deposit(player, 500).await.unwrap();
        let provider: Arc<dyn EconomyProvider> = Arc::new(provider);

        let core = TitleCore::with_parts(
            Arc::new(InMemoryTitleStore::new()),
            Arc::clone(&provider),
            catalog(),
            &DispatcherSettings::default(),
        );
        let pump = spawn_pump(&core);
        core.handle_connect(player);

        assert_eq!(
            core.purchase(player, "vip").outcome().await,
            PurchaseOutcome::Granted
        );
        assert_eq!(provider.balance(player).await.unwrap(), 0);

        let view = core.query(player).outcome().await.unwrap();
        assert!(view.owns("vip"));

        // Repeat purchase is benign and free.
        assert_eq!(
            core.purchase(player, "vip").outcome().await,
            PurchaseOutcome::AlreadyOwned
        );
        assert_eq!(provider.balance(player).await.unwrap(), 0);

        assert_eq!(
            core.set_active(player, Some("vip")).outcome().await,
            SelectionOutcome::Applied
        );

        // The display read goes through the cache only; give the background
        // load a moment to publish.
        let mut display = None;
        for _ in 0..100 {
            display = core.current_active_display(player);
            if display.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(display.as_deref(), Some("[VIP]"));

        let entries = core.recent_transactions(player, 10).outcome().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, Some(500));

        core.shutdown().await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_without_economy_rejects_purchases_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("titles.db")
            .to_str()
            .unwrap()
            .to_string();
        let config = CoreConfig {
            storage: StorageSettings::Sqlite(SqliteSettings { path }),
            pool: PoolSettings::default(),
            economy: EconomySettings::default(),
            dispatcher: DispatcherSettings::default(),
        };

        let core = TitleCore::init(config, vec![
            TitleDefinition {
                key: "vip".to_string(),
                display: "[VIP]".to_string(),
                cost: Some(500),
                purchasable: true,
            },
        ])
        .await
        .unwrap();
        let pump = spawn_pump(&core);
        let player = Uuid::new_v4();

        assert_eq!(
            core.purchase(player, "vip").outcome().await,
            PurchaseOutcome::ProviderUnavailable
        );
        assert_eq!(
            core.grant(player, "vip").outcome().await,
            GrantOutcome::Granted
        );
        assert_eq!(
            core.revoke(player, "vip").outcome().await,
            RevokeOutcome::Revoked
        );

        core.shutdown().await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_evicts_cache() {
        let player = Uuid::new_v4();
        let provider: Arc<dyn EconomyProvider> = Arc::new(wallet_provider().await);
        let core = TitleCore::with_parts(
            Arc::new(InMemoryTitleStore::new()),
            provider,
            catalog(),
            &DispatcherSettings::default(),
        );
        let pump = spawn_pump(&core);

        core.grant(player, "founder").outcome().await;
        core.handle_connect(player);
        for _ in 0..100 {
            if matches!(core.inner.cache.get(player), CacheRead::Loaded(_)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(
            core.inner.cache.get(player),
            CacheRead::Loaded(_)
        ));

        core.handle_disconnect(player);
        assert_eq!(core.inner.cache.get(player), CacheRead::NotLoaded);

        core.shutdown().await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_display_read_never_blocks_and_tolerates_misses() {
        let player = Uuid::new_v4();
        let provider: Arc<dyn EconomyProvider> = Arc::new(wallet_provider().await);
        let core = TitleCore::with_parts(
            Arc::new(InMemoryTitleStore::new()),
            provider,
            catalog(),
            &DispatcherSettings::default(),
        );
        let pump = spawn_pump(&core);

        // First read right after "connect": nothing loaded yet, no blocking.
        assert_eq!(core.current_active_display(player), None);

        core.shutdown().await;
        pump.await.unwrap();
    }
}
