//! Passive query observability
//!
//! This module provides:
//! - Query tracking with shape normalization and a bounded history
//! - Slow-query detection with optional execution-plan capture
//! - N+1 pattern detection scoped to a request or the recent window
//! - Advisory index suggestions derived from slow-query text
//!
//! Nothing here blocks or rewrites a query. Analysis output is advisory
//! and analysis failures degrade to empty or default results.

mod analysis;

pub use analysis::{IndexSuggestion, NPlusOnePattern, QueryAnalysis};

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::metrics::metrics;

// ============================================================================
// Types
// ============================================================================

/// Statement class, taken from the leading keyword of the normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl QueryKind {
    pub fn from_normalized(normalized: &str) -> Self {
        match normalized.split_whitespace().next() {
            Some("SELECT") => QueryKind::Select,
            Some("INSERT") => QueryKind::Insert,
            Some("UPDATE") => QueryKind::Update,
            Some("DELETE") => QueryKind::Delete,
            _ => QueryKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Select => "select",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Other => "other",
        }
    }
}

/// One tracked query execution.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLog {
    pub query_id: Uuid,
    pub normalized_text: String,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// Captured only for slow queries when a plan provider is configured
    pub execution_plan: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub query_type: QueryKind,
}

/// Aggregate counters, derived on demand.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerMetrics {
    pub total_queries: u64,
    pub slow_queries: u64,
    pub slow_query_rate: f64,
    pub avg_execution_time_ms: f64,
    pub patterns_tracked: usize,
}

/// Source of execution plans for slow queries, typically an EXPLAIN
/// round-trip. Absent, captured plans stay `None`.
pub trait PlanProvider: Send + Sync {
    fn plan_for(&self, query: &str) -> Option<String>;
}

#[derive(Default)]
struct PatternStats {
    count: u64,
    total_time_ms: f64,
}

#[derive(Default)]
struct OptimizerInner {
    history: VecDeque<QueryLog>,
    patterns: HashMap<String, PatternStats>,
    total_queries: u64,
    slow_queries: u64,
    total_time_ms: f64,
}

// ============================================================================
// Query optimizer
// ============================================================================

/// Tracks query executions and answers advisory analysis questions.
///
/// Mutation happens under one lock around the history and pattern map.
/// Analysis methods copy a snapshot out and run without the lock, so they
/// may run concurrently with tracking.
pub struct QueryOptimizer {
    config: OptimizerConfig,
    inner: Mutex<OptimizerInner>,
    plans: Option<Box<dyn PlanProvider>>,
}

impl QueryOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(OptimizerInner::default()),
            plans: None,
        }
    }

    /// Attach an execution-plan source used for slow queries.
    pub fn with_plan_provider(mut self, provider: Box<dyn PlanProvider>) -> Self {
        self.plans = Some(provider);
        self
    }

    /// Record one execution. Normalizes the text into a pattern key,
    /// appends to the bounded history, and updates running totals. Above
    /// the slow threshold the query is logged and its plan captured.
    pub fn track_query(
        &self,
        query_text: &str,
        execution_time_ms: f64,
        parameters: Option<serde_json::Value>,
        request_id: Option<String>,
        user_id: Option<String>,
    ) {
        let normalized = analysis::normalize_query(query_text);
        let query_type = QueryKind::from_normalized(&normalized);
        let slow = execution_time_ms > self.config.slow_query_threshold_ms as f64;

        let execution_plan = match (slow, self.plans.as_ref()) {
            (true, Some(provider)) => provider.plan_for(query_text),
            _ => None,
        };

        metrics().record_query(query_type.as_str(), execution_time_ms / 1_000.0);
        if slow {
            metrics().record_slow_query();
            warn!(
                pattern = %normalized,
                execution_time_ms,
                request_id = request_id.as_deref().unwrap_or("-"),
                "Slow query recorded"
            );
        }

        let log = QueryLog {
            query_id: Uuid::new_v4(),
            normalized_text: normalized.clone(),
            execution_time_ms,
            timestamp: Utc::now(),
            execution_plan,
            parameters,
            request_id,
            user_id,
            query_type,
        };

        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        inner.total_time_ms += execution_time_ms;
        if slow {
            inner.slow_queries += 1;
        }
        let stats = inner.patterns.entry(normalized).or_default();
        stats.count += 1;
        stats.total_time_ms += execution_time_ms;
        inner.history.push_back(log);
        while inner.history.len() > self.config.max_query_history {
            inner.history.pop_front();
        }
    }

    /// Most recent `n` tracked queries in arrival order.
    pub fn recent_queries(&self, n: usize) -> Vec<QueryLog> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(n);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Every history entry above the slow threshold, oldest first.
    pub fn slow_queries(&self) -> Vec<QueryLog> {
        let threshold = self.config.slow_query_threshold_ms as f64;
        let inner = self.inner.lock();
        inner
            .history
            .iter()
            .filter(|log| log.execution_time_ms > threshold)
            .cloned()
            .collect()
    }

    /// Look for N+1 access patterns, scoped to one request when an id is
    /// given, otherwise over the whole retained history.
    pub fn detect_n_plus_one(&self, request_id: Option<&str>) -> Vec<NPlusOnePattern> {
        let logs: Vec<QueryLog> = {
            let inner = self.inner.lock();
            match request_id {
                Some(rid) => inner
                    .history
                    .iter()
                    .filter(|log| log.request_id.as_deref() == Some(rid))
                    .cloned()
                    .collect(),
                None => inner.history.iter().cloned().collect(),
            }
        };
        analysis::detect_n_plus_one(&logs, &self.config)
    }

    /// Index suggestions derived from the current slow-query set.
    pub fn suggest_indexes(&self) -> Vec<IndexSuggestion> {
        let slow = self.slow_queries();
        analysis::suggest_indexes(&slow, &self.config)
    }

    /// Read the captured plan of one log entry. Entries without a plan,
    /// and plans that do not parse, yield the default analysis.
    pub fn analyze_query(&self, log: &QueryLog) -> QueryAnalysis {
        match log.execution_plan.as_deref() {
            Some(plan) => analysis::analyze_plan(plan),
            None => QueryAnalysis::default(),
        }
    }

    pub fn get_metrics(&self) -> OptimizerMetrics {
        let inner = self.inner.lock();
        let slow_query_rate = match inner.total_queries {
            0 => 0.0,
            total => inner.slow_queries as f64 / total as f64,
        };
        let avg_execution_time_ms = match inner.total_queries {
            0 => 0.0,
            total => inner.total_time_ms / total as f64,
        };
        OptimizerMetrics {
            total_queries: inner.total_queries,
            slow_queries: inner.slow_queries,
            slow_query_rate,
            avg_execution_time_ms,
            patterns_tracked: inner.patterns.len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
