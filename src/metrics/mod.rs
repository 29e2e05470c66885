//! Engine metrics.
//!
//! Every engine owns its own [`Registry`] so several engines (and tests) can
//! live in one process without colliding on metric names.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::error::{Error, Result};
use crate::health::PoolHealth;

const NAMESPACE: &str = "shardpool";

pub struct EngineMetrics {
    registry: Registry,
    pub shard_writes: IntCounter,
    pub shard_write_failures: IntCounter,
    pub write_rollbacks: IntCounter,
    pub objects_stored: IntCounter,
    pub degraded_reads: IntCounter,
    pub unrecoverable_reads: IntCounter,
    pub probe_failures: IntCounter,
    /// Moves by outcome: committed, failed, skipped, dropped
    pub rebalance_moves: IntCounterVec,
    pub rebalance_bytes_moved: IntCounter,
    pub encode_seconds: Histogram,
    pool_health: IntGaugeVec,
}

fn prom(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom)?;
            registry.register(Box::new(c.clone())).map_err(prom)?;
            Ok(c)
        };

        let shard_writes = counter("shard_writes_total", "Shard copies written")?;
        let shard_write_failures =
            counter("shard_write_failures_total", "Shard writes that failed after retries")?;
        let write_rollbacks =
            counter("write_rollbacks_total", "Object writes rolled back after a shard failure")?;
        let objects_stored = counter("objects_stored_total", "Objects committed to the catalog")?;
        let degraded_reads =
            counter("degraded_reads_total", "Reads that needed reconstruction")?;
        let unrecoverable_reads = counter(
            "unrecoverable_reads_total",
            "Reads that found fewer than k valid shards",
        )?;
        let probe_failures = counter("probe_failures_total", "Failed reachability probes")?;
        let rebalance_bytes_moved =
            counter("rebalance_bytes_moved_total", "Shard bytes relocated by rebalance")?;

        let rebalance_moves = IntCounterVec::new(
            Opts::new("rebalance_moves_total", "Rebalance moves by outcome").namespace(NAMESPACE),
            &["outcome"],
        )
        .map_err(prom)?;
        registry
            .register(Box::new(rebalance_moves.clone()))
            .map_err(prom)?;

        let encode_seconds = Histogram::with_opts(
            HistogramOpts::new("encode_seconds", "Time spent erasure coding one object")
                .namespace(NAMESPACE)
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .map_err(prom)?;
        registry
            .register(Box::new(encode_seconds.clone()))
            .map_err(prom)?;

        let pool_health = IntGaugeVec::new(
            Opts::new(
                "pool_health",
                "Pool health: 0 healthy, 1 degraded, 2 unavailable",
            )
            .namespace(NAMESPACE),
            &["pool"],
        )
        .map_err(prom)?;
        registry
            .register(Box::new(pool_health.clone()))
            .map_err(prom)?;

        Ok(Self {
            registry,
            shard_writes,
            shard_write_failures,
            write_rollbacks,
            objects_stored,
            degraded_reads,
            unrecoverable_reads,
            probe_failures,
            rebalance_moves,
            rebalance_bytes_moved,
            encode_seconds,
            pool_health,
        })
    }

    pub fn set_pool_health(&self, pool: &str, health: PoolHealth) {
        self.pool_health.with_label_values(&[pool]).set(health.level());
    }

    pub fn forget_pool(&self, pool: &str) {
        // absent label is fine
        let _ = self.pool_health.remove_label_values(&[pool]);
    }

    pub fn record_move(&self, outcome: &str) {
        self.rebalance_moves.with_label_values(&[outcome]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every metric.
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}
