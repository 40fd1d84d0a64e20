//! C3: the HTTP client that talks to the carbon backend cluster.
//!
//! Mirrors the donor's zipper: a small pool of backend base URLs, a
//! round-robin picker for the first attempt and `idx+1 mod N` on retry, and
//! two fetch strategies — `do_query` (first success wins, used for normal
//! render fetches) and `do_query_to_all` (every server must answer, used for
//! `/metrics/find` style discovery across a sharded cluster).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::UpstreamsConf;
use crate::error::{CarbonApiError, ErrorKind};
use crate::metricdata::{FetchRequest, MetricData};

pub struct ZipperClient {
    client: reqwest::Client,
    servers: Vec<String>,
    max_tries: u32,
    retry_codes: std::collections::HashSet<u16>,
    round_robin: AtomicUsize,
    backend_cache: Option<Arc<dyn Cache>>,
    backend_cache_ttl: Duration,
}

impl ZipperClient {
    pub fn new(conf: &UpstreamsConf) -> Self {
        Self::with_cache(conf, None, Duration::from_secs(60))
    }

    pub fn with_cache(conf: &UpstreamsConf, backend_cache: Option<Arc<dyn Cache>>, backend_cache_ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(conf.timeout))
            .build()
            .expect("zipper http client");
        ZipperClient {
            client,
            servers: conf.servers.clone(),
            max_tries: conf.max_tries.max(1),
            retry_codes: conf.retry_codes.iter().copied().collect(),
            round_robin: AtomicUsize::new(0),
            backend_cache,
            backend_cache_ttl,
        }
    }

    fn server_count(&self) -> usize {
        self.servers.len().max(1)
    }

    fn first_index(&self) -> usize {
        if self.servers.len() <= 1 {
            0
        } else {
            self.round_robin.fetch_add(1, Ordering::Relaxed) % self.servers.len()
        }
    }

    fn server_url(&self, idx: usize) -> Option<&str> {
        self.servers.get(idx % self.server_count()).map(|s| s.as_str())
    }

    fn classify_transport_error(err: &reqwest::Error) -> CarbonApiError {
        if err.is_timeout() {
            CarbonApiError::new(ErrorKind::Timeout, format!("backend timeout: {err}"))
        } else if err.is_connect() {
            CarbonApiError::new(ErrorKind::BackendUnreachable, format!("backend unreachable: {err}"))
        } else {
            CarbonApiError::new(ErrorKind::ResponseMalformed, format!("backend response error: {err}"))
        }
    }

    /// First-success-wins fetch: tries up to `max_tries` servers, advancing
    /// the index by one each retry, and returns as soon as one answers with a
    /// status not in the retry set.
    pub async fn do_query(&self, req: &FetchRequest) -> Result<Vec<MetricData>, CarbonApiError> {
        if self.servers.is_empty() {
            return Err(CarbonApiError::new(ErrorKind::BackendUnreachable, "no upstream servers configured"));
        }
        let mut idx = self.first_index();
        let mut last_err = None;
        for attempt in 0..self.max_tries {
            let base = self.server_url(idx).unwrap();
            match self.fetch_one(base, req).await {
                Ok(series) => return Ok(series),
                Err(e) => {
                    let retry = self.retry_codes.contains(&e.status.as_u16()) && attempt + 1 < self.max_tries;
                    last_err = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
            idx = (idx + 1) % self.server_count();
        }
        Err(last_err.unwrap_or_else(|| {
            CarbonApiError::new(ErrorKind::MaxTriesExceeded, "exhausted retries against all upstream servers")
        }))
    }

    /// Fan-out fetch: every configured server must answer successfully; used
    /// where the cluster is sharded and a query must cover every shard.
    pub async fn do_query_to_all(&self, req: &FetchRequest) -> Result<Vec<MetricData>, CarbonApiError> {
        if self.servers.is_empty() {
            return Err(CarbonApiError::new(ErrorKind::BackendUnreachable, "no upstream servers configured"));
        }
        let mut out = Vec::new();
        for base in &self.servers {
            out.extend(self.fetch_one(base, req).await?);
        }
        Ok(out)
    }

    fn backend_cache_key(base: &str, req: &FetchRequest) -> String {
        format!(
            "bc:{}:{}:{}:{}",
            base, req.path_expression, req.start_time, req.stop_time
        )
    }

    async fn fetch_one(&self, base: &str, req: &FetchRequest) -> Result<Vec<MetricData>, CarbonApiError> {
        let cache_key = Self::backend_cache_key(base, req);
        let body = if let Some(cache) = &self.backend_cache {
            if let Some(cached) = cache.get(&cache_key).await {
                cached
            } else {
                let fetched = self.fetch_body(base, req).await?;
                cache.set(&cache_key, fetched.clone(), self.backend_cache_ttl).await;
                fetched
            }
        } else {
            self.fetch_body(base, req).await?
        };

        let parsed: Vec<RawSeries> = serde_json::from_slice(&body)
            .map_err(|e| CarbonApiError::new(ErrorKind::ResponseMalformed, format!("malformed backend response: {e}")))?;

        Ok(parsed
            .into_iter()
            .map(|s| {
                let values: Vec<f64> = s
                    .datapoints
                    .into_iter()
                    .map(|(v, _ts)| v.unwrap_or(f64::NAN))
                    .collect();
                let step = if s.step > 0 { s.step } else { 60 };
                let mut md = MetricData::new(s.target, values, s.start.unwrap_or(req.start_time), step);
                md.path_expression = req.path_expression.clone();
                md.request_start_time = req.start_time;
                md.request_stop_time = req.stop_time;
                md
            })
            .collect())
    }

    /// Issues the actual HTTP request and returns the raw JSON body. Caching
    /// happens on these bytes, not on the parsed `MetricData`, so absent
    /// samples (JSON `null`) round-trip without needing a NaN-aware codec.
    async fn fetch_body(&self, base: &str, req: &FetchRequest) -> Result<Vec<u8>, CarbonApiError> {
        let url = format!("{}/render", base.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("target", req.path_expression.as_str()),
                ("from", &req.start_time.to_string()),
                ("until", &req.stop_time.to_string()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| Self::classify_transport_error(&e))?;

        let status = resp.status();
        // an unmatched glob is an everyday occurrence in Graphite, not a
        // failure: treat it as an empty success rather than propagating it
        // as an error that would abort the whole target evaluation.
        if status.as_u16() == 404 {
            return Ok(b"[]".to_vec());
        }
        if !status.is_success() {
            let kind = match status.as_u16() {
                400 => ErrorKind::InvalidArg,
                403 => ErrorKind::Forbidden,
                _ => ErrorKind::FailedToFetch,
            };
            return Err(CarbonApiError::new(kind, format!("backend returned {status}"))
                .with_context("server", base));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Self::classify_transport_error(&e))
    }
}

#[derive(serde::Deserialize)]
struct RawSeries {
    target: String,
    datapoints: Vec<(Option<f64>, i64)>,
    #[serde(default)]
    start: Option<i64>,
    #[serde(default = "default_step")]
    step: i64,
}

fn default_step() -> i64 {
    60
}
