// Economy provider backed by a companion currency plugin's wallet database.
//
// The wallet table belongs to the currency plugin; this adapter only reads
// balances and applies conditional debits against it.

use crate::core::economy::{EconomyError, EconomyProvider};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

pub struct WalletDbProvider {
    pool: SqlitePool,
}

impl WalletDbProvider {
    /// Connects to the wallet database. Failure here means the provider is
    /// unavailable and resolution moves on to the next candidate.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Self::with_pool(pool).await
    }

    /// Wraps an existing pool; used by tests.
    pub async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        // The currency plugin normally creates this table; creating it here
        // keeps a fresh database usable.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                player_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn provider_err(e: sqlx::Error) -> EconomyError {
    EconomyError::Provider(e.to_string())
}

#[async_trait]
impl EconomyProvider for WalletDbProvider {
    fn name(&self) -> &'static str {
        "wallet-db"
    }

    async fn balance(&self, player_id: Uuid) -> Result<i64, EconomyError> {
        let row = sqlx::query("SELECT balance FROM wallets WHERE player_id = ?")
            .bind(player_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(provider_err)?;

        Ok(row.map(|r| r.get::<i64, _>("balance")).unwrap_or(0))
    }

    async fn withdraw(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::Provider(
                "withdraw amount must be positive".to_string(),
            ));
        }

        // The conditional update is the atomicity guarantee: the debit only
        // lands when the balance still covers it.
        let result = sqlx::query(
            "UPDATE wallets SET balance = balance - ? WHERE player_id = ? AND balance >= ?",
        )
        .bind(amount)
        .bind(player_id.to_string())
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(provider_err)?;

        if result.rows_affected() == 0 {
            return Err(EconomyError::InsufficientFunds);
        }
        Ok(())
    }

    async fn deposit(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::Provider(
                "deposit amount must be positive".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO wallets (player_id, balance)
            VALUES (?, ?)
            ON CONFLICT(player_id) DO UPDATE SET balance = balance + excluded.balance
            "#,
        )
        .bind(player_id.to_string())
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(provider_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_provider() -> WalletDbProvider {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        WalletDbProvider::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_player_has_zero_balance() {
        let provider = memory_provider().await;
        assert_eq!(provider.balance(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw() {
        let provider = memory_provider().await;
        let player = Uuid::new_v4();

        provider.deposit(player, 500).await.unwrap();
        assert_eq!(provider.balance(player).await.unwrap(), 500);

        provider.withdraw(player, 500).await.unwrap();
        assert_eq!(provider.balance(player).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overdraw_moves_no_funds() {
        let provider = memory_provider().await;
        let player = Uuid::new_v4();

        provider.deposit(player, 100).await.unwrap();
        assert!(matches!(
            provider.withdraw(player, 101).await,
            Err(EconomyError::InsufficientFunds)
        ));
        assert_eq!(provider.balance(player).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_rejected() {
        let provider = memory_provider().await;
        let player = Uuid::new_v4();

        assert!(provider.withdraw(player, 0).await.is_err());
        assert!(provider.deposit(player, -5).await.is_err());
    }
}
