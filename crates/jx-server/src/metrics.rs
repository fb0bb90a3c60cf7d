//! Prometheus metrics

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Requests by endpoint and outcome.
    pub requests: IntCounterVec,
    pub documents: IntCounterVec,
    pub query_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("jx".to_string()), None)?;
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Requests handled"),
            &["endpoint", "outcome"],
        )?;
        let documents = IntCounterVec::new(
            Opts::new("documents_inserted_total", "Documents inserted"),
            &["fact"],
        )?;
        let query_seconds = Histogram::with_opts(HistogramOpts::new(
            "query_duration_seconds",
            "Time to compile, run and assemble a query",
        ))?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(documents.clone()))?;
        registry.register(Box::new(query_seconds.clone()))?;
        Ok(Metrics {
            registry,
            requests,
            documents,
            query_seconds,
        })
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.requests.with_label_values(&["query", "ok"]).inc();
        metrics.query_seconds.observe(0.01);
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"jx_requests_total{endpoint="query",outcome="ok"} 1"#));
        assert!(text.contains("jx_query_duration_seconds_count 1"));
    }
}
