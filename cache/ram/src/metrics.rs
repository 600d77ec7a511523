//! Cache metrics.
//!
//! Counters and gauges are registered with metriken; exposition is left to
//! the embedding process.

use metriken::{Counter, Gauge, metric};

/// Opens that found the object already cached.
#[metric(
    name = "cache_open_hits",
    description = "Opens that found the object in the cache"
)]
pub static OPEN_HITS: Counter = Counter::new();

/// Opens that found nothing under the requested id.
#[metric(
    name = "cache_open_misses",
    description = "Opens that found no object for the requested id"
)]
pub static OPEN_MISSES: Counter = Counter::new();

/// Objects committed into the cache.
#[metric(
    name = "cache_objects_committed",
    description = "Objects committed into the cache"
)]
pub static OBJECTS_COMMITTED: Counter = Counter::new();

/// Payload bytes committed into the cache.
#[metric(
    name = "cache_bytes_committed",
    description = "Payload bytes committed into the cache"
)]
pub static BYTES_COMMITTED: Counter = Counter::new();

/// Objects dropped by eviction.
#[metric(
    name = "cache_objects_evicted",
    description = "Objects dropped by eviction"
)]
pub static OBJECTS_EVICTED: Counter = Counter::new();

/// Payload bytes dropped by eviction.
#[metric(
    name = "cache_bytes_evicted",
    description = "Payload bytes dropped by eviction"
)]
pub static BYTES_EVICTED: Counter = Counter::new();

/// Total payload bytes currently cached.
#[metric(name = "cache_used_bytes", description = "Total payload bytes cached")]
pub static USED_BYTES: Gauge = Gauge::new();

/// Currently open handles.
#[metric(name = "cache_open_handles", description = "Currently open handles")]
pub static OPEN_HANDLES: Gauge = Gauge::new();
