use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

/// Cluster used when the classified cluster has no catalog entry.
pub const GENERIC_CLUSTER: &str = "c_logic_generic_failed_tests";

/// Last-resort hint when the catalog cannot produce any text.
pub const FALLBACK_HINT: &str = "Controlla il primo test che fallisce e ripercorri il flusso \
     con un input piccolo, concentrandoti su casi limite e gestione della memoria.";

/// Immutable per-language hint catalog:
/// cluster_key -> { variants: { name -> { "1"|"2"|"3" -> text } } }.
/// Shared read-only across concurrent requests.
pub struct HintCatalog {
    root: Value,
}

impl HintCatalog {
    pub fn empty() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    fn entry(&self, cluster_key: &str) -> Option<&Map<String, Value>> {
        self.root.get(cluster_key).and_then(Value::as_object)
    }

    fn entry_or_generic(&self, cluster_key: &str) -> Option<&Map<String, Value>> {
        self.entry(cluster_key)
            .or_else(|| self.entry(GENERIC_CLUSTER))
    }

    fn variants_of(entry: &Map<String, Value>) -> Option<&Map<String, Value>> {
        entry.get("variants").and_then(Value::as_object)
    }

    /// Variant names in catalog-declared order, with the generic-cluster
    /// fallback applied. An absent or empty entry yields `["default"]` so the
    /// selector always has something to pick from.
    pub fn variant_names(&self, cluster_key: &str) -> Vec<String> {
        let names: Vec<String> = self
            .entry_or_generic(cluster_key)
            .and_then(Self::variants_of)
            .map(|variants| variants.keys().cloned().collect())
            .unwrap_or_default();
        if names.is_empty() {
            vec!["default".to_string()]
        } else {
            names
        }
    }

    /// Resolves (cluster, level, variant) to literal hint text. Degrades
    /// gracefully: exact cluster, else the generic cluster, else a hardcoded
    /// literal; exact variant, else the first declared one; exact level, else
    /// downward search to 1. Always returns non-empty text.
    pub fn resolve_text(&self, cluster_key: &str, hint_level: i32, hint_variant: &str) -> String {
        let Some(entry) = self.entry_or_generic(cluster_key) else {
            return FALLBACK_HINT.to_string();
        };
        let Some(variants) = Self::variants_of(entry) else {
            return FALLBACK_HINT.to_string();
        };
        let chosen = variants
            .get(hint_variant)
            .and_then(Value::as_object)
            .or_else(|| variants.values().next().and_then(Value::as_object));
        let Some(levels) = chosen else {
            return FALLBACK_HINT.to_string();
        };
        for level in (1..=hint_level.max(1)).rev() {
            if let Some(text) = levels.get(&level.to_string()).and_then(Value::as_str) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
        FALLBACK_HINT.to_string()
    }
}

/// Per-language catalog cache, loaded lazily and kept for the process
/// lifetime. Concurrent first access races at most on the file read; the
/// write-lock entry keeps a single winning instance.
pub struct CatalogCache {
    dir: PathBuf,
    loaded: RwLock<HashMap<String, Arc<HintCatalog>>>,
}

impl CatalogCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Load-or-insert for one language. A missing or unreadable catalog file
    /// becomes an empty catalog so resolution degrades to the literal
    /// fallback instead of failing.
    pub fn load(&self, language: &str) -> Arc<HintCatalog> {
        {
            let loaded = self.loaded.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(catalog) = loaded.get(language) {
                return catalog.clone();
            }
        }

        let catalog = Arc::new(self.read_from_disk(language));
        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        loaded
            .entry(language.to_string())
            .or_insert(catalog)
            .clone()
    }

    fn read_from_disk(&self, language: &str) -> HintCatalog {
        let path = self.dir.join(format!("{}.json", language));
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "Catalog file {} unavailable ({}), using empty catalog",
                    path.display(),
                    e
                );
                return HintCatalog::empty();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(root) if root.is_object() => HintCatalog::from_value(root),
            Ok(_) => {
                tracing::warn!(
                    "Catalog {} is not a JSON object, using empty catalog",
                    path.display()
                );
                HintCatalog::empty()
            }
            Err(e) => {
                tracing::warn!("Failed to parse catalog {}: {}", path.display(), e);
                HintCatalog::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> HintCatalog {
        HintCatalog::from_value(json!({
            "c_segfault": {
                "variants": {
                    "default": { "1": "seg L1", "2": "seg L2" },
                    "guided": { "1": "seg guided L1" }
                }
            },
            "c_logic_generic_failed_tests": {
                "variants": {
                    "default": { "1": "generic L1", "2": "generic L2", "3": "generic L3" }
                }
            }
        }))
    }

    #[test]
    fn exact_cluster_variant_and_level_resolve() {
        assert_eq!(catalog().resolve_text("c_segfault", 2, "default"), "seg L2");
    }

    #[test]
    fn missing_level_searches_downward() {
        assert_eq!(catalog().resolve_text("c_segfault", 3, "default"), "seg L2");
        assert_eq!(
            catalog().resolve_text("c_segfault", 3, "guided"),
            "seg guided L1"
        );
    }

    #[test]
    fn unknown_variant_uses_first_declared_variant() {
        assert_eq!(
            catalog().resolve_text("c_segfault", 1, "nonexistent"),
            "seg L1"
        );
    }

    #[test]
    fn unknown_cluster_falls_back_to_generic_entry() {
        assert_eq!(
            catalog().resolve_text("c_never_seen", 3, "default"),
            "generic L3"
        );
    }

    #[test]
    fn empty_catalog_returns_the_literal_fallback() {
        let empty = HintCatalog::empty();
        let text = empty.resolve_text("c_segfault", 2, "default");
        assert_eq!(text, FALLBACK_HINT);
        assert!(!text.is_empty());
    }

    #[test]
    fn variant_names_preserve_catalog_order() {
        assert_eq!(catalog().variant_names("c_segfault"), vec!["default", "guided"]);
    }

    #[test]
    fn variant_names_fall_back_to_generic_then_default() {
        assert_eq!(catalog().variant_names("c_never_seen"), vec!["default"]);
        assert_eq!(HintCatalog::empty().variant_names("c_segfault"), vec!["default"]);
    }

    #[test]
    fn cache_serves_empty_catalog_for_missing_language() {
        let cache = CatalogCache::new("does-not-exist");
        let catalog = cache.load("pascal");
        assert_eq!(
            catalog.resolve_text("anything", 1, "default"),
            FALLBACK_HINT
        );
        // second load hits the cache and returns the same instance
        assert!(Arc::ptr_eq(&catalog, &cache.load("pascal")));
    }
}
