use crate::models::{parameter_signature, Parameters, RunSummary};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEvaluation {
    pub objective_value: f64,
    pub summary: Option<RunSummary>,
    pub intermediate_values: Vec<f64>,
}

/// Objective results memoized by parameter signature, shared across worker threads.
#[derive(Clone, Default)]
pub struct ResultCache {
    local_cache: Arc<DashMap<String, CachedEvaluation>>,
    hits: Arc<AtomicUsize>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_cache_key(scope: &str, parameters: &Parameters) -> String {
        format!("{}|{}", scope, parameter_signature(parameters))
    }

    pub fn check_cache(&self, scope: &str, parameters: &Parameters) -> Option<CachedEvaluation> {
        let cache_key = Self::get_cache_key(scope, parameters);
        let cached = self.local_cache.get(&cache_key).map(|entry| entry.clone());
        if cached.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        cached
    }

    pub fn store_cache(&self, scope: &str, parameters: &Parameters, evaluation: CachedEvaluation) {
        self.local_cache
            .insert(Self::get_cache_key(scope, parameters), evaluation);
    }

    pub fn len(&self) -> usize {
        self.local_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_cache.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.local_cache.clear();
        self.hits.store(0, Ordering::Relaxed);
    }
}
