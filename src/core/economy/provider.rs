// Port to the currency backend.
//
// The core never owns balances. Purchases debit whatever provider the host
// environment supplies, selected once at startup; administrative grants
// bypass this interface entirely.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum EconomyError {
    /// The player cannot cover the requested amount. No funds moved.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// No currency backend is available.
    #[error("no economy provider available")]
    Unavailable,

    /// The backend failed or answered with something unusable.
    #[error("economy provider error: {0}")]
    Provider(String),
}

/// Uniform interface over a currency backend.
///
/// `withdraw` must be atomic from the caller's perspective: either the full
/// amount is deducted, or no funds move at all.
#[async_trait]
pub trait EconomyProvider: Send + Sync {
    /// Short name used in logs ("wallet-db", "http", "null").
    fn name(&self) -> &'static str;

    async fn balance(&self, player_id: Uuid) -> Result<i64, EconomyError>;

    async fn withdraw(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError>;

    /// Returns funds to the player. Used for compensating refunds when a
    /// grant could not be persisted after a successful withdraw.
    async fn deposit(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError>;
}

/// Stand-in used when no configured provider could be initialized.
/// Every monetary operation is rejected.
pub struct NullEconomyProvider;

#[async_trait]
impl EconomyProvider for NullEconomyProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn balance(&self, _player_id: Uuid) -> Result<i64, EconomyError> {
        Err(EconomyError::Unavailable)
    }

    async fn withdraw(&self, _player_id: Uuid, _amount: i64) -> Result<(), EconomyError> {
        Err(EconomyError::Unavailable)
    }

    async fn deposit(&self, _player_id: Uuid, _amount: i64) -> Result<(), EconomyError> {
        Err(EconomyError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_provider_rejects_everything() {
        let provider = NullEconomyProvider;
        let player = Uuid::new_v4();

        assert!(matches!(
            provider.balance(player).await,
            Err(EconomyError::Unavailable)
        ));
        assert!(matches!(
            provider.withdraw(player, 10).await,
            Err(EconomyError::Unavailable)
        ));
        assert!(matches!(
            provider.deposit(player, 10).await,
            Err(EconomyError::Unavailable)
        ));
    }
}
