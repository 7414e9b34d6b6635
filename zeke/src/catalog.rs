//! Model catalog: `(provider, model-id) → capabilities, costs, health`.
//!
//! Populated lazily from each adapter's listing endpoint (on `doctor` or on
//! first request against a provider) and refreshed from routing stats. The
//! catalog participates in router scoring but is never authoritative about
//! availability; the router tolerates a stale record.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// What a model can do. Stored as a JSON array in the `models` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Code,
    Chat,
    Vision,
    Tools,
    Reasoning,
}

/// One catalog entry. `id` is `"<provider>:<model-name>"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    pub context_length: u32,
    pub capabilities: HashSet<Capability>,
    pub cost_in_per_1k: f64,
    pub cost_out_per_1k: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_avg_ms: Option<f64>,
    pub success_rate: f64,
    pub available: bool,
    /// Unix seconds of the last listing/health probe.
    pub last_checked: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ModelRecord {
    /// Canonical id for a provider/model pair.
    pub fn make_id(provider: &str, name: &str) -> String {
        format!("{provider}:{name}")
    }

    /// Builds a record with required fields; optionals default to absent,
    /// `success_rate` to 1.0, `available` to true.
    pub fn new(provider: &str, name: &str, context_length: u32) -> Self {
        Self {
            id: Self::make_id(provider, name),
            provider: provider.to_string(),
            name: name.to_string(),
            display_name: None,
            family: None,
            parameter_size: None,
            quantization: None,
            context_length: context_length.max(1),
            capabilities: HashSet::new(),
            cost_in_per_1k: 0.0,
            cost_out_per_1k: 0.0,
            latency_avg_ms: None,
            success_rate: 1.0,
            available: true,
            last_checked: chrono::Utc::now().timestamp(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    pub fn with_costs(mut self, cost_in: f64, cost_out: f64) -> Self {
        self.cost_in_per_1k = cost_in;
        self.cost_out_per_1k = cost_out;
        self
    }

    /// Whether this model can serve the given intent.
    pub fn supports_intent(&self, intent: crate::chat::Intent) -> bool {
        use crate::chat::Intent;
        let needed = match intent {
            Intent::Code | Intent::Completion | Intent::Refactor | Intent::Tests => {
                Capability::Code
            }
            Intent::Explain => Capability::Chat,
            Intent::Architecture | Intent::Reason => Capability::Reasoning,
        };
        // An empty capability set means the listing endpoint gave us nothing;
        // treat as unknown-capable rather than excluding the model.
        self.capabilities.is_empty() || self.capabilities.contains(&needed)
    }

    /// Blended per-1k-token cost used for the cheapest-first tie break.
    pub fn blended_cost(&self) -> f64 {
        (self.cost_in_per_1k + self.cost_out_per_1k) / 2.0
    }
}

/// In-process catalog. Read-mostly; guarded by a reader-writer lock that is
/// never held across an await.
#[derive(Default)]
pub struct ModelCatalog {
    inner: RwLock<HashMap<String, ModelRecord>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn upsert(&self, record: ModelRecord) {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        map.insert(record.id.clone(), record);
    }

    /// Replaces all records for one provider with a fresh listing.
    pub fn replace_provider(&self, provider: &str, records: Vec<ModelRecord>) {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        map.retain(|_, r| r.provider != provider);
        for r in records {
            map.insert(r.id.clone(), r);
        }
    }

    pub fn get(&self, id: &str) -> Option<ModelRecord> {
        self.inner
            .read()
            .expect("catalog lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<ModelRecord> {
        let mut all: Vec<ModelRecord> = self
            .inner
            .read()
            .expect("catalog lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn list_provider(&self, provider: &str) -> Vec<ModelRecord> {
        let mut out: Vec<ModelRecord> = self
            .inner
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|r| r.provider == provider)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Available models for a provider that can serve the intent, cheapest
    /// first then highest success rate.
    pub fn candidates_for(
        &self,
        provider: &str,
        intent: crate::chat::Intent,
    ) -> Vec<ModelRecord> {
        let mut out: Vec<ModelRecord> = self
            .inner
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|r| r.provider == provider && r.available && r.supports_intent(intent))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.blended_cost()
                .partial_cmp(&b.blended_cost())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.success_rate
                        .partial_cmp(&a.success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        out
    }

    /// Marks one model unavailable (e.g. after repeated failures).
    pub fn mark_unavailable(&self, id: &str) {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        if let Some(r) = map.get_mut(id) {
            r.available = false;
            r.last_checked = chrono::Utc::now().timestamp();
        }
    }

    /// Folds an observed request outcome into the record's rolling averages.
    pub fn record_outcome(&self, id: &str, latency_ms: u64, success: bool) {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        if let Some(r) = map.get_mut(id) {
            let lat = latency_ms as f64;
            r.latency_avg_ms = Some(match r.latency_avg_ms {
                Some(prev) => prev * 0.9 + lat * 0.1,
                None => lat,
            });
            let s = if success { 1.0 } else { 0.0 };
            r.success_rate = (r.success_rate * 0.95 + s * 0.05).clamp(0.0, 1.0);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Intent;

    fn rec(provider: &str, name: &str, cost: f64, rate: f64) -> ModelRecord {
        let mut r = ModelRecord::new(provider, name, 8192)
            .with_capabilities([Capability::Code, Capability::Chat])
            .with_costs(cost, cost);
        r.success_rate = rate;
        r
    }

    #[test]
    fn make_id_joins_provider_and_name() {
        assert_eq!(
            ModelRecord::make_id("ollama", "qwen2.5-coder:7b"),
            "ollama:qwen2.5-coder:7b"
        );
    }

    #[test]
    fn candidates_sorted_cheapest_first() {
        let cat = ModelCatalog::new();
        cat.upsert(rec("openai", "gpt-4o", 5.0, 0.99));
        cat.upsert(rec("openai", "gpt-4o-mini", 0.3, 0.98));
        let c = cat.candidates_for("openai", Intent::Code);
        assert_eq!(c[0].name, "gpt-4o-mini");
        assert_eq!(c[1].name, "gpt-4o");
    }

    #[test]
    fn unavailable_models_excluded_from_candidates() {
        let cat = ModelCatalog::new();
        cat.upsert(rec("xai", "grok-3", 2.0, 1.0));
        cat.mark_unavailable("xai:grok-3");
        assert!(cat.candidates_for("xai", Intent::Code).is_empty());
        // Still listed; just not a candidate.
        assert_eq!(cat.list_provider("xai").len(), 1);
    }

    #[test]
    fn reasoning_intent_requires_reasoning_capability() {
        let mut r = ModelRecord::new("openai", "gpt-4o-mini", 128_000)
            .with_capabilities([Capability::Code, Capability::Chat]);
        assert!(!r.supports_intent(Intent::Architecture));
        r.capabilities.insert(Capability::Reasoning);
        assert!(r.supports_intent(Intent::Reason));
    }

    #[test]
    fn empty_capabilities_treated_as_unknown_capable() {
        let r = ModelRecord::new("ollama", "llama3", 8192);
        assert!(r.supports_intent(Intent::Architecture));
    }

    #[test]
    fn replace_provider_drops_stale_entries() {
        let cat = ModelCatalog::new();
        cat.upsert(rec("ollama", "old-model", 0.0, 1.0));
        cat.replace_provider("ollama", vec![rec("ollama", "new-model", 0.0, 1.0)]);
        assert!(cat.get("ollama:old-model").is_none());
        assert!(cat.get("ollama:new-model").is_some());
    }

    #[test]
    fn record_outcome_moves_rolling_averages() {
        let cat = ModelCatalog::new();
        cat.upsert(rec("openai", "gpt-4o", 5.0, 1.0));
        cat.record_outcome("openai:gpt-4o", 500, false);
        let r = cat.get("openai:gpt-4o").unwrap();
        assert!(r.success_rate < 1.0);
        assert_eq!(r.latency_avg_ms, Some(500.0));
    }
}
