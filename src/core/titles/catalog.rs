// Title reference data.
//
// Definitions come from the external configuration loader at startup and
// never change while the core is running; the store only ever references
// them by key.

use serde::Deserialize;
use std::collections::HashMap;

/// A single configured title.
#[derive(Debug, Clone, Deserialize)]
pub struct TitleDefinition {
    /// Stable key used in storage and commands.
    pub key: String,
    /// Text shown next to the player's name.
    pub display: String,
    /// Purchase price. `None` marks a grant-only title.
    #[serde(default)]
    pub cost: Option<i64>,
    /// Whether the title is offered for purchase at all.
    #[serde(default)]
    pub purchasable: bool,
}

impl TitleDefinition {
    /// The price a purchase has to pay, if this title can be bought.
    pub fn purchase_cost(&self) -> Option<i64> {
        if self.purchasable {
            self.cost
        } else {
            None
        }
    }
}

/// Immutable lookup table over every configured title.
///
/// Later duplicates of a key replace earlier ones, matching how layered
/// config files override each other.
pub struct TitleCatalog {
    titles: HashMap<String, TitleDefinition>,
}

impl TitleCatalog {
    pub fn new(definitions: Vec<TitleDefinition>) -> Self {
        let mut titles = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            titles.insert(definition.key.clone(), definition);
        }
        Self { titles }
    }

    pub fn get(&self, key: &str) -> Option<&TitleDefinition> {
        self.titles.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.titles.contains_key(key)
    }

    /// Display text for a title key, if configured.
    pub fn display(&self, key: &str) -> Option<&str> {
        self.titles.get(key).map(|t| t.display.as_str())
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TitleDefinition> {
        self.titles.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vip() -> TitleDefinition {
        TitleDefinition {
            key: "vip".to_string(),
            display: "[VIP]".to_string(),
            cost: Some(500),
            purchasable: true,
        }
    }

    #[test]
    fn test_lookup_by_key() {
        let catalog = TitleCatalog::new(vec![vip()]);

        assert!(catalog.contains("vip"));
        assert_eq!(catalog.display("vip"), Some("[VIP]"));
        assert_eq!(catalog.get("vip").unwrap().cost, Some(500));
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn test_purchase_cost_requires_purchasable() {
        let mut grant_only = vip();
        grant_only.purchasable = false;

        assert_eq!(vip().purchase_cost(), Some(500));
        assert_eq!(grant_only.purchase_cost(), None);
    }

    #[test]
    fn test_later_duplicate_wins() {
        let mut override_vip = vip();
        override_vip.cost = Some(100);
        let catalog = TitleCatalog::new(vec![vip(), override_vip]);

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("vip").unwrap().cost, Some(100));
    }

    #[test]
    fn test_definitions_deserialize_with_defaults() {
        let raw = r#"
        [
            { "key": "vip", "display": "[VIP]", "cost": 500, "purchasable": true },
            { "key": "founder", "display": "[Founder]" }
        ]
        "#;
        let definitions: Vec<TitleDefinition> = serde_json::from_str(raw).unwrap();
        let catalog = TitleCatalog::new(definitions);

        let founder = catalog.get("founder").unwrap();
        assert_eq!(founder.cost, None);
        assert!(!founder.purchasable);
    }
}
