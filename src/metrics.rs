//! Process-wide request counters.
//!
//! Mirrors the two counter families the reference implementation keeps side by
//! side: `render`/`*` for the render pipeline and `find`/`Find*` for the
//! tags/metrics-find family, each broken down per HTTP status class. `/info`
//! reads these; a periodic exporter would translate them to Graphite line
//! protocol (see `config::GraphiteTelemetryConf`) but opening that socket is
//! out of scope here.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct StatusCounters {
    pub c200: AtomicU64,
    pub c400: AtomicU64,
    pub c403: AtomicU64,
    pub c404: AtomicU64,
    pub c500: AtomicU64,
    pub c502: AtomicU64,
    pub c503: AtomicU64,
    pub c504: AtomicU64,
}

impl StatusCounters {
    pub fn record(&self, status: u16) {
        let counter = match status {
            200 => &self.c200,
            400 => &self.c400,
            403 => &self.c403,
            404 => &self.c404,
            500 => &self.c500,
            502 => &self.c502,
            503 => &self.c503,
            504 => &self.c504,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> [(&'static str, u64); 8] {
        [
            ("200", self.c200.load(Ordering::Relaxed)),
            ("400", self.c400.load(Ordering::Relaxed)),
            ("403", self.c403.load(Ordering::Relaxed)),
            ("404", self.c404.load(Ordering::Relaxed)),
            ("500", self.c500.load(Ordering::Relaxed)),
            ("502", self.c502.load(Ordering::Relaxed)),
            ("503", self.c503.load(Ordering::Relaxed)),
            ("504", self.c504.load(Ordering::Relaxed)),
        ]
    }
}

#[derive(Default)]
pub struct ApiMetrics {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
    pub render_status: StatusCounters,

    pub find_requests: AtomicU64,
    pub find_errors: AtomicU64,
    pub find_status: StatusCounters,

    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub backend_cache_hits: AtomicU64,
    pub backend_cache_misses: AtomicU64,

    pub memcache_timeouts: AtomicU64,
}

impl ApiMetrics {
    pub fn record_render(&self, status: u16) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.render_status.record(status);
    }

    pub fn record_find(&self, status: u16) {
        self.find_requests.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.find_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.find_status.record(status);
    }
}
