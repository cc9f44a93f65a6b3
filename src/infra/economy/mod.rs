// Economy infrastructure - concrete currency backends and their resolution.

mod http;
mod wallet_db;

pub use http::HttpEconomyProvider;
pub use wallet_db::WalletDbProvider;

use std::sync::Arc;

use crate::core::config::{EconomySettings, ProviderSettings};
use crate::core::economy::{EconomyProvider, NullEconomyProvider};

/// Walks the configured providers in priority order and keeps the first one
/// that initializes. With no candidate left, the null provider takes over:
/// purchases are rejected while administrative grants keep working.
pub async fn resolve_provider(settings: &EconomySettings) -> Arc<dyn EconomyProvider> {
    for candidate in &settings.providers {
        match candidate {
            ProviderSettings::WalletDb { url } => match WalletDbProvider::connect(url).await {
                Ok(provider) => {
                    tracing::info!(provider = provider.name(), "economy provider selected");
                    return Arc::new(provider);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "wallet database unavailable, trying next provider");
                }
            },
            ProviderSettings::Http {
                base_url,
                api_token,
            } => match HttpEconomyProvider::new(base_url.clone(), api_token.clone()) {
                Ok(provider) => {
                    tracing::info!(provider = provider.name(), "economy provider selected");
                    return Arc::new(provider);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "http economy client unusable, trying next provider");
                }
            },
        }
    }

    tracing::warn!("no economy provider available; purchases will be rejected");
    Arc::new(NullEconomyProvider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_settings_fall_back_to_null() {
        let provider = resolve_provider(&EconomySettings::default()).await;
        assert_eq!(provider.name(), "null");
    }

    #[tokio::test]
    async fn test_unreachable_candidate_falls_through() {
        let settings = EconomySettings {
            providers: vec![ProviderSettings::WalletDb {
                url: "sqlite:///no/such/directory/wallets.db".to_string(),
            }],
        };
        let provider = resolve_provider(&settings).await;
        assert_eq!(provider.name(), "null");
    }

    #[tokio::test]
    async fn test_priority_order_is_list_order() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", tmp.path().to_str().unwrap());
        let settings = EconomySettings {
            providers: vec![
                ProviderSettings::WalletDb { url },
                ProviderSettings::Http {
                    base_url: "http://economy:8080".to_string(),
                    api_token: None,
                },
            ],
        };

        let provider = resolve_provider(&settings).await;
        assert_eq!(provider.name(), "wallet-db");
    }
}
