// sources.rs - Registry of third-party public-data APIs and their keys
// Seeded from a JSON file at startup; read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::core::types::{ApiKey, ApiSource, ApiSourceSummary};

#[derive(Debug, Deserialize, Default)]
pub struct SourceSeed {
    #[serde(default)]
    pub sources: Vec<ApiSource>,
    #[serde(default)]
    pub keys: Vec<ApiKey>,
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Vec<ApiSource>,
    keys: HashMap<String, Vec<ApiKey>>,
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the registry, rejecting duplicate source names and keys that
    /// reference an unknown source.
    pub fn from_seed(seed: SourceSeed) -> Result<Self> {
        let mut names = HashSet::new();
        for source in &seed.sources {
            if !names.insert(source.name.as_str()) {
                bail!("duplicate api source name: {}", source.name);
            }
            url::Url::parse(&source.base_url)
                .with_context(|| format!("invalid base_url for source {}", source.name))?;
        }

        let mut keys: HashMap<String, Vec<ApiKey>> = HashMap::new();
        for key in seed.keys {
            if !names.contains(key.source.as_str()) {
                return Err(anyhow!("api key references unknown source: {}", key.source));
            }
            keys.entry(key.source.clone()).or_default().push(key);
        }

        Ok(Self {
            sources: seed.sources,
            keys,
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read api source seed {}", path.display()))?;
        let seed: SourceSeed = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse api source seed {}", path.display()))?;
        let registry = Self::from_seed(seed)?;
        info!(
            "Loaded {} api sources ({} keys) from {}",
            registry.sources.len(),
            registry.keys.values().map(Vec::len).sum::<usize>(),
            path.display()
        );
        Ok(registry)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ApiSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ApiSource> {
        self.sources.iter().filter(|s| s.is_active)
    }

    /// Active, unexpired keys for `source` at `now`, in seed order.
    pub fn usable_keys(&self, source: &str, now: DateTime<Utc>) -> Vec<&ApiKey> {
        self.keys
            .get(source)
            .map(|keys| keys.iter().filter(|k| k.is_usable_at(now)).collect())
            .unwrap_or_default()
    }

    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<ApiSourceSummary> {
        self.active_sources()
            .map(|s| ApiSourceSummary {
                name: s.name.clone(),
                display_name: s.display_name.clone(),
                base_url: s.base_url.clone(),
                auth_type: s.auth_type,
                response_format: s.response_format,
                rate_limit: s.rate_limit.clone(),
                usable_keys: self.usable_keys(&s.name, now).len(),
            })
            .collect()
    }
}
