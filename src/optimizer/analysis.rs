//! Query-shape heuristics over normalized SQL text.
//!
//! Everything here is advisory. Extraction is regex matching against
//! normalized query text, not SQL parsing; false positives and negatives
//! are expected and acceptable for an advisory tool, and a full parser is
//! deliberately out of scope.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::OptimizerConfig;

use super::{QueryKind, QueryLog};

/// A query pattern that looks like an N+1 access.
#[derive(Debug, Clone, Serialize)]
pub struct NPlusOnePattern {
    /// Normalized text of the repeated child query
    pub pattern: String,
    pub count: u64,
    /// Nearest distinct SELECT preceding the first repetition
    pub parent_query: Option<String>,
}

/// Advice to add an index, derived from slow-query text alone.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSuggestion {
    pub table: String,
    pub columns: Vec<String>,
    pub index_type: String,
    pub reason: String,
    /// Percent, scaled by reference frequency and capped
    pub estimated_improvement: f64,
}

/// Best-effort readout of one execution plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryAnalysis {
    pub has_index: bool,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub rows_examined: u64,
    pub rows_returned: u64,
    pub suggestions: Vec<String>,
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'[^']*'").unwrap())
}

fn number_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn from_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bFROM\s+([A-Z_][A-Z0-9_]*)(?:\s+(?:AS\s+)?([A-Z_][A-Z0-9_]*))?").unwrap()
    })
}

fn join_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bJOIN\s+([A-Z_][A-Z0-9_]*)(?:\s+(?:AS\s+)?([A-Z_][A-Z0-9_]*))?").unwrap()
    })
}

fn where_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bWHERE\s+(.+?)(?:\s+GROUP\s+BY|\s+ORDER\s+BY|\s+HAVING|\s+LIMIT|$)")
            .unwrap()
    })
}

fn on_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bON\s+(.+?)(?:\s+WHERE|\s+(?:INNER|LEFT|RIGHT|FULL|CROSS)?\s*JOIN|\s+GROUP\s+BY|\s+ORDER\s+BY|\s+LIMIT|$)")
            .unwrap()
    })
}

fn order_by_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bORDER\s+BY\s+(.+?)(?:\s+LIMIT|\s+OFFSET|$)").unwrap()
    })
}

fn comparison_lhs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Z_][A-Z0-9_]*(?:\.[A-Z_][A-Z0-9_]*)?)\s*(?:=|!=|<>|<=|>=|<|>)").unwrap()
    })
}

fn comparison_rhs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:=|!=|<>|<=|>=|<|>)\s*([A-Z_][A-Z0-9_]*(?:\.[A-Z_][A-Z0-9_]*)?)").unwrap()
    })
}

fn keyword_op_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Z_][A-Z0-9_]*(?:\.[A-Z_][A-Z0-9_]*)?)\s+(?:LIKE|IN|BETWEEN|IS)\b")
            .unwrap()
    })
}

fn plan_cost_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"cost=\d+(?:\.\d+)?\.\.(\d+(?:\.\d+)?)").unwrap())
}

fn plan_rows_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"rows=(\d+)").unwrap())
}

fn plan_actual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"actual time=\d+(?:\.\d+)?\.\.(\d+(?:\.\d+)?) rows=(\d+)").unwrap()
    })
}

const SQL_KEYWORDS: &[&str] = &[
    "AND", "OR", "NOT", "NULL", "TRUE", "FALSE", "IS", "IN", "LIKE", "BETWEEN", "EXISTS",
    "SELECT", "WHERE", "FROM", "JOIN", "ON", "AS", "ASC", "DESC", "CASE", "WHEN", "THEN",
    "ELSE", "END", "DISTINCT",
];

const ALIAS_STOPWORDS: &[&str] = &[
    "WHERE", "JOIN", "ON", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "GROUP",
    "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION", "SET", "AND", "OR",
];

/// Collapse a query to its shape: uppercase, literals replaced with `?`,
/// whitespace folded. Queries differing only in bound values normalize to
/// the same pattern key.
pub(crate) fn normalize_query(query: &str) -> String {
    let upper = query.trim().to_uppercase();
    let no_strings = string_literal_re().replace_all(&upper, "?");
    let no_numbers = number_literal_re().replace_all(&no_strings, "?");
    whitespace_re()
        .replace_all(&no_numbers, " ")
        .trim()
        .to_string()
}

/// Flag patterns that repeat like an N+1 access: more than the threshold
/// occurrences, every successive pair within the index window, and the
/// shape of a filtered read (SELECT with WHERE).
pub(crate) fn detect_n_plus_one(
    logs: &[QueryLog],
    config: &OptimizerConfig,
) -> Vec<NPlusOnePattern> {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, log) in logs.iter().enumerate() {
        positions
            .entry(log.normalized_text.as_str())
            .or_default()
            .push(idx);
    }

    let mut flagged = Vec::new();
    for (pattern, idxs) in positions {
        if idxs.len() <= config.n_plus_one_threshold {
            continue;
        }
        if !pattern.contains("SELECT") || !pattern.contains("WHERE") {
            continue;
        }
        let clustered = idxs
            .windows(2)
            .all(|pair| pair[1] - pair[0] <= config.n_plus_one_index_window);
        if !clustered {
            continue;
        }

        let first = idxs[0];
        let parent_query = logs[..first]
            .iter()
            .rev()
            .find(|log| log.query_type == QueryKind::Select && log.normalized_text != pattern)
            .map(|log| log.normalized_text.clone());

        flagged.push(NPlusOnePattern {
            pattern: pattern.to_string(),
            count: idxs.len() as u64,
            parent_query,
        });
    }

    flagged.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    flagged
}

/// Tally `(table, column)` references across the slow set and suggest an
/// index for anything referenced at least `index_min_references` times.
pub(crate) fn suggest_indexes(
    slow_queries: &[QueryLog],
    config: &OptimizerConfig,
) -> Vec<IndexSuggestion> {
    let mut references: HashMap<(String, String), u64> = HashMap::new();
    for log in slow_queries {
        for (table, column) in extract_columns(&log.normalized_text) {
            *references.entry((table, column)).or_insert(0) += 1;
        }
    }

    let mut suggestions: Vec<IndexSuggestion> = references
        .into_iter()
        .filter(|(_, count)| *count as usize >= config.index_min_references)
        .map(|((table, column), count)| IndexSuggestion {
            reason: format!(
                "{column} on {table} is referenced {count} times across recent slow queries"
            ),
            estimated_improvement: (20.0 + 10.0 * count as f64)
                .min(config.estimated_improvement_cap),
            table,
            columns: vec![column],
            index_type: "btree".to_string(),
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.estimated_improvement
            .total_cmp(&a.estimated_improvement)
            .then_with(|| a.table.cmp(&b.table))
            .then_with(|| a.columns.cmp(&b.columns))
    });
    suggestions
}

/// Pull `(table, column)` pairs out of WHERE, JOIN ON, and ORDER BY
/// clauses. Bare columns are attributed to the first FROM table; qualified
/// ones are resolved through the alias map.
pub(crate) fn extract_columns(normalized: &str) -> Vec<(String, String)> {
    let tables = table_map(normalized);
    let primary = from_table_re()
        .captures(normalized)
        .map(|c| c[1].to_string());

    let mut clauses: Vec<String> = Vec::new();
    for caps in where_clause_re().captures_iter(normalized) {
        clauses.push(caps[1].to_string());
    }
    for caps in on_clause_re().captures_iter(normalized) {
        clauses.push(caps[1].to_string());
    }

    let mut pairs = Vec::new();
    for clause in &clauses {
        for caps in comparison_lhs_re().captures_iter(clause) {
            push_column(&mut pairs, &caps[1], &tables, primary.as_deref());
        }
        for caps in comparison_rhs_re().captures_iter(clause) {
            push_column(&mut pairs, &caps[1], &tables, primary.as_deref());
        }
        for caps in keyword_op_re().captures_iter(clause) {
            push_column(&mut pairs, &caps[1], &tables, primary.as_deref());
        }
    }

    for caps in order_by_re().captures_iter(normalized) {
        for item in caps[1].split(',') {
            let column = item
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim();
            if !column.is_empty() {
                push_column(&mut pairs, column, &tables, primary.as_deref());
            }
        }
    }

    pairs
}

fn push_column(
    pairs: &mut Vec<(String, String)>,
    token: &str,
    tables: &HashMap<String, String>,
    primary: Option<&str>,
) {
    if SQL_KEYWORDS.contains(&token) || !is_identifier(token) {
        return;
    }
    let pair = match token.split_once('.') {
        Some((qualifier, column)) => {
            let table = tables
                .get(qualifier)
                .cloned()
                .unwrap_or_else(|| qualifier.to_string());
            (table, column.to_string())
        }
        None => match primary {
            Some(table) => (table.to_string(), token.to_string()),
            None => return,
        },
    };
    if !pairs.contains(&pair) {
        pairs.push(pair);
    }
}

/// Identifier-shaped token, optionally qualified. Rejects placeholders
/// left by normalization (ORDER BY 1 becomes ORDER BY ?).
fn is_identifier(token: &str) -> bool {
    token.split('.').all(|part| {
        part.chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Table names and aliases, both mapping to the real table name.
fn table_map(normalized: &str) -> HashMap<String, String> {
    let mut tables = HashMap::new();
    for re in [from_table_re(), join_table_re()] {
        for caps in re.captures_iter(normalized) {
            let table = caps[1].to_string();
            tables.insert(table.clone(), table.clone());
            if let Some(alias) = caps.get(2) {
                let alias = alias.as_str();
                if !ALIAS_STOPWORDS.contains(&alias) {
                    tables.insert(alias.to_string(), table.clone());
                }
            }
        }
    }
    tables
}

/// Read costs, row counts, and index usage out of an EXPLAIN-style plan.
/// Anything unrecognized yields the default analysis; this never fails.
pub(crate) fn analyze_plan(plan: &str) -> QueryAnalysis {
    let upper = plan.to_uppercase();
    let has_index = upper.contains("INDEX");

    let estimated_cost = plan_cost_re()
        .captures(plan)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(0.0);
    let rows_examined = plan_rows_re()
        .captures(plan)
        .and_then(|c| c[1].parse::<u64>().ok())
        .unwrap_or(0);
    let (actual_cost, rows_returned) = match plan_actual_re().captures(plan) {
        Some(caps) => (
            caps[1].parse::<f64>().unwrap_or(0.0),
            caps[2].parse::<u64>().unwrap_or(0),
        ),
        None => (0.0, 0),
    };

    let mut suggestions = Vec::new();
    if !has_index && upper.contains("SEQ SCAN") {
        suggestions
            .push("Sequential scan with no index usage; consider indexing the filtered columns".to_string());
    }
    if rows_returned > 0 && rows_examined > rows_returned.saturating_mul(10) {
        suggestions.push(format!(
            "Examined {rows_examined} rows to return {rows_returned}; filters look weakly selective"
        ));
    }

    QueryAnalysis {
        has_index,
        estimated_cost,
        actual_cost,
        rows_examined,
        rows_returned,
        suggestions,
    }
}
