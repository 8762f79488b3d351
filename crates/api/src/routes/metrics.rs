//! # 运行时指标端点
//!
//! `GET /metrics` 默认返回 JSON 汇总；当 `Accept: text/plain` 或查询参数
//! `?format=prom` 时改为 Prometheus 文本暴露格式，供 Prometheus/Grafana 直接
//! 抓取。不经过限流/鉴权中间件（见 `server.rs` 的路由分组）。

use axum::extract::{Query, State};
use axum::http::header::ACCEPT;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Deserialize;

use tickerflow_core::health::ProviderMetrics;

use crate::server::AppState;
use crate::types::{MarketMetricsResponse, MetricsResponse, ProviderMetricsResponse, WsFanoutMetricsResponse};

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    format: Option<String>,
}

fn wants_prometheus_text(headers: &HeaderMap, query: &MetricsQuery) -> bool {
    if query.format.as_deref() == Some("prom") {
        return true;
    }
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/plain"))
}

fn market_metrics(gateway_metrics: [(&'static str, ProviderMetrics); 3]) -> MarketMetricsResponse {
    let mut quote = ProviderMetricsResponse::from(ProviderMetrics::default());
    let mut chart = ProviderMetricsResponse::from(ProviderMetrics::default());
    let mut detail = ProviderMetricsResponse::from(ProviderMetrics::default());
    for (kind, metrics) in gateway_metrics {
        match kind {
            "quote" => quote = metrics.into(),
            "chart" => chart = metrics.into(),
            "detail" => detail = metrics.into(),
            _ => {}
        }
    }
    MarketMetricsResponse { quote, chart, detail }
}

fn collect(state: &AppState) -> MetricsResponse {
    MetricsResponse {
        crypto: market_metrics(state.crypto.metrics()),
        us: market_metrics(state.us.metrics()),
        bist: market_metrics(state.bist.metrics()),
        crypto_stream: WsFanoutMetricsResponse {
            connected_clients: state.crypto_fanout.client_count(),
            distinct_symbols: state.crypto_fanout.distinct_symbol_count(),
        },
        trade_stream: WsFanoutMetricsResponse {
            connected_clients: state.trade_fanout.client_count(),
            distinct_symbols: state.trade_fanout.distinct_symbol_count(),
        },
        http_retry_count: state.http_executor.retry_count(),
    }
}

/// 注册一个按 `market`/`provider` 打标签的计数器族，静态指标名/帮助文本永远
/// 合法，注册到一个刚创建的空 `Registry` 也不会与已有指标冲突。
fn provider_gauge_vec(registry: &Registry, name: &str, help: &str) -> IntGaugeVec {
    let vec = IntGaugeVec::new(Opts::new(name, help), &["market", "provider"])
        .expect("static metric name/help is always valid");
    registry
        .register(Box::new(vec.clone()))
        .expect("metric name is registered exactly once per fresh registry");
    vec
}

fn stream_gauge_vec(registry: &Registry, name: &str, help: &str) -> IntGaugeVec {
    let vec = IntGaugeVec::new(Opts::new(name, help), &["stream"])
        .expect("static metric name/help is always valid");
    registry
        .register(Box::new(vec.clone()))
        .expect("metric name is registered exactly once per fresh registry");
    vec
}

fn plain_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::with_opts(Opts::new(name, help)).expect("static metric name/help is always valid");
    registry
        .register(Box::new(gauge.clone()))
        .expect("metric name is registered exactly once per fresh registry");
    gauge
}

fn render_prometheus_text(snapshot: &MetricsResponse) -> String {
    let registry = Registry::new();

    let cache_hits = provider_gauge_vec(&registry, "tickerflow_cache_hits", "cumulative cache hits");
    let cache_misses = provider_gauge_vec(&registry, "tickerflow_cache_misses", "cumulative cache misses");
    let cache_size = provider_gauge_vec(&registry, "tickerflow_cache_size", "current cache entry count");
    let limiter_active = provider_gauge_vec(&registry, "tickerflow_limiter_active", "in-flight limiter slots");
    let limiter_pending =
        provider_gauge_vec(&registry, "tickerflow_limiter_pending", "queued limiter submissions");
    let circuit_open =
        provider_gauge_vec(&registry, "tickerflow_circuit_open", "1 if the circuit breaker is open");

    let markets: [(&str, &MarketMetricsResponse); 3] =
        [("crypto", &snapshot.crypto), ("us", &snapshot.us), ("bist", &snapshot.bist)];
    for (market, metrics) in markets {
        for (provider, m) in [
            ("quote", &metrics.quote),
            ("chart", &metrics.chart),
            ("detail", &metrics.detail),
        ] {
            let labels = [market, provider];
            cache_hits.with_label_values(&labels).set(m.cache_hits as i64);
            cache_misses.with_label_values(&labels).set(m.cache_misses as i64);
            cache_size.with_label_values(&labels).set(m.cache_size as i64);
            limiter_active.with_label_values(&labels).set(m.limiter_active as i64);
            limiter_pending.with_label_values(&labels).set(m.limiter_pending as i64);
            circuit_open.with_label_values(&labels).set(i64::from(m.circuit_open));
        }
    }

    let ws_clients = stream_gauge_vec(&registry, "tickerflow_ws_connected_clients", "connected WebSocket clients");
    let ws_symbols = stream_gauge_vec(&registry, "tickerflow_ws_distinct_symbols", "distinct subscribed symbols");
    for (stream, fanout) in [("crypto_stream", &snapshot.crypto_stream), ("trade_stream", &snapshot.trade_stream)] {
        ws_clients.with_label_values(&[stream]).set(fanout.connected_clients as i64);
        ws_symbols.with_label_values(&[stream]).set(fanout.distinct_symbols as i64);
    }

    let retry_count = plain_gauge(&registry, "tickerflow_http_retry_count", "cumulative HTTP retries");
    retry_count.set(snapshot.http_retry_count as i64);

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buffer);
    String::from_utf8(buffer).unwrap_or_default()
}

/// `GET /metrics` — JSON 默认，`Accept: text/plain` 或 `?format=prom` 切换为
/// Prometheus 文本暴露格式。
#[utoipa::path(get, path = "/metrics", tag = "health", responses((status = 200, body = crate::types::SuccessEnvelope<MetricsResponse>)))]
pub async fn metrics(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<MetricsQuery>) -> Response {
    let snapshot = collect(&state);

    if wants_prometheus_text(&headers, &query) {
        let body = render_prometheus_text(&snapshot);
        return (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response();
    }

    Json(crate::types::SuccessEnvelope::new(snapshot)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_format_query_param_is_detected() {
        let query = MetricsQuery { format: Some("prom".to_string()) };
        assert!(wants_prometheus_text(&HeaderMap::new(), &query));
    }

    #[test]
    fn plain_text_accept_header_is_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, "text/plain".parse().unwrap());
        let query = MetricsQuery { format: None };
        assert!(wants_prometheus_text(&headers, &query));
    }

    #[test]
    fn json_is_the_default() {
        let query = MetricsQuery { format: None };
        assert!(!wants_prometheus_text(&HeaderMap::new(), &query));
    }

    #[test]
    fn render_prometheus_text_includes_registered_metric_names() {
        let snapshot = MetricsResponse {
            crypto: market_metrics([
                ("quote", ProviderMetrics::default()),
                ("chart", ProviderMetrics::default()),
                ("detail", ProviderMetrics::default()),
            ]),
            us: market_metrics([
                ("quote", ProviderMetrics::default()),
                ("chart", ProviderMetrics::default()),
                ("detail", ProviderMetrics::default()),
            ]),
            bist: market_metrics([
                ("quote", ProviderMetrics::default()),
                ("chart", ProviderMetrics::default()),
                ("detail", ProviderMetrics::default()),
            ]),
            crypto_stream: WsFanoutMetricsResponse { connected_clients: 0, distinct_symbols: 0 },
            trade_stream: WsFanoutMetricsResponse { connected_clients: 0, distinct_symbols: 0 },
            http_retry_count: 0,
        };
        let text = render_prometheus_text(&snapshot);
        assert!(text.contains("tickerflow_http_retry_count"));
        assert!(text.contains("tickerflow_ws_connected_clients"));
        assert!(text.contains(r#"stream="crypto_stream""#));
    }
}
