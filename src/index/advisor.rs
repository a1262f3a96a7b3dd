//! Plan inspection and tuning advice.

use std::sync::LazyLock;

use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pool::{ConnectionManager, ConnectionPool};
use crate::store::StoreConnection;

/// Execution time above which a query is reported as slow.
pub const SLOW_QUERY_MS: f64 = 1000.0;

static EXECUTION_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Execution Time:\s*([0-9.]+)\s*ms").unwrap());
static PLANNING_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Planning Time:\s*([0-9.]+)\s*ms").unwrap());
static SHARED_BUFFERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"shared hit=(\d+)(?:\s+read=(\d+))?").unwrap());
static SHARED_HIT_BLOCKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""?Shared Hit Blocks"?:\s*(\d+)"#).unwrap());
static SHARED_READ_BLOCKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""?Shared Read Blocks"?:\s*(\d+)"#).unwrap());
static INDEX_SCAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Index (?:Only )?Scan using (\S+)").unwrap());

/// What an explain plan says about a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub execution_ms: Option<f64>,
    pub planning_ms: Option<f64>,
    pub buffer_hits: u64,
    pub buffer_reads: u64,
    /// First index the plan scans, if any.
    pub index_used: Option<String>,
    pub seq_scan: bool,
    pub advice: Vec<String>,
}

impl Recommendations {
    /// Parse `EXPLAIN (ANALYZE, BUFFERS)` output.
    ///
    /// Buffer counters are summed over every plan node, in either the text
    /// format (`Buffers: shared hit=.. read=..`) or the JSON/YAML key
    /// format (`Shared Hit Blocks: ..`).
    pub fn from_plan(plan: &str) -> Self {
        let capture_f64 = |re: &Regex| {
            re.captures(plan)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        };
        let sum = |re: &Regex, group: usize| -> u64 {
            re.captures_iter(plan)
                .filter_map(|c| c.get(group))
                .filter_map(|m| m.as_str().parse::<u64>().ok())
                .sum()
        };

        let mut report = Recommendations {
            execution_ms: capture_f64(&EXECUTION_TIME),
            planning_ms: capture_f64(&PLANNING_TIME),
            buffer_hits: sum(&SHARED_BUFFERS, 1) + sum(&SHARED_HIT_BLOCKS, 1),
            buffer_reads: sum(&SHARED_BUFFERS, 2) + sum(&SHARED_READ_BLOCKS, 1),
            index_used: INDEX_SCAN
                .captures(plan)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            seq_scan: plan.contains("Seq Scan"),
            advice: Vec::new(),
        };
        report.advice = report.advise();
        report
    }

    /// Share of buffer accesses served from the cache, if any were made.
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.buffer_hits + self.buffer_reads;
        (total > 0).then(|| self.buffer_hits as f64 / total as f64)
    }

    fn advise(&self) -> Vec<String> {
        let mut advice = Vec::new();
        if self.seq_scan {
            advice.push(
                "Sequential scan detected: add a vector or full-text index on the scanned table"
                    .to_string(),
            );
        }
        if self.buffer_reads > self.buffer_hits {
            advice.push(format!(
                "Low buffer cache hit ratio ({} hits, {} reads): consider raising shared_buffers",
                self.buffer_hits, self.buffer_reads
            ));
        }
        if let Some(ms) = self.execution_ms.filter(|ms| *ms > SLOW_QUERY_MS) {
            advice.push(format!(
                "Slow query ({ms:.1} ms): consider an approximate index or a smaller candidate set"
            ));
        }
        advice
    }
}

/// Run `statement` under `EXPLAIN (ANALYZE, BUFFERS)` with `params` bound
/// to its placeholders and derive advice.
///
/// `ANALYZE` executes the statement, so every placeholder needs a value.
pub async fn explain_and_advise<M>(
    pool: &ConnectionPool<M>,
    statement: &str,
    params: &[serde_json::Value],
) -> Result<Recommendations>
where
    M: ConnectionManager,
    M::Connection: StoreConnection,
{
    let statement = statement.to_string();
    let params = params.to_vec();
    let plan = pool
        .with_connection("explain", move |conn| {
            async move { conn.explain(&statement, &params).await }.boxed()
        })
        .await?;
    Ok(Recommendations::from_plan(&plan))
}
