//! # 全局配置结构
//!
//! `app` crate 用 `config` crate 分层加载（`config.toml` → 环境变量，`TICKERFLOW_`
//! 前缀）填充这里的结构体；本 crate 只定义形状与默认值，不碰文件系统或环境变量。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub http_client: HttpClientConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub throttle: ThrottleConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub ingestion: IngestionConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// 每主机 HTTP 执行器的默认策略；Provider 按 host 模式可覆盖个别字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    pub cache_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

/// 单个 Provider 的吞吐限流参数：并发上限 + 两次起始之间的最小间隔。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderThrottle {
    pub concurrency: usize,
    pub min_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub default: ProviderThrottle,
    pub crypto: ProviderThrottle,
    pub market_data: ProviderThrottle,
    pub news: ProviderThrottle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub max_size: usize,
    pub sweep_interval_ms: u64,
    pub grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub bcrypt_rounds: u32,
}

/// 每 IP 令牌桶限流，应用于除健康检查外的所有网关端点。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

/// 每个新闻源一个布尔开关，决定调度器是否排入该采集器。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub gdelt_enabled: bool,
    pub sec_rss_enabled: bool,
    pub kap_enabled: bool,
    pub google_news_rss_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/tickerflow.db".to_string(),
            },
            http_client: HttpClientConfig {
                timeout_ms: 8_000,
                retry_count: 3,
                retry_base_ms: 500,
                retry_cap_ms: 10_000,
                cache_ttl_ms: 0,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout_ms: 1_800_000,
            },
            throttle: ThrottleConfig {
                default: ProviderThrottle {
                    concurrency: 3,
                    min_delay_ms: 100,
                },
                crypto: ProviderThrottle {
                    concurrency: 5,
                    min_delay_ms: 50,
                },
                market_data: ProviderThrottle {
                    concurrency: 3,
                    min_delay_ms: 100,
                },
                news: ProviderThrottle {
                    concurrency: 2,
                    min_delay_ms: 300,
                },
            },
            cache: CacheConfig {
                ttl_ms: 60_000,
                max_size: 1_000,
                sweep_interval_ms: 60_000,
                grace_ms: 60_000,
            },
            auth: AuthConfig {
                jwt_secret: "dev-only-secret-change-me".to_string(),
                bcrypt_rounds: 12,
            },
            ingestion: IngestionConfig {
                gdelt_enabled: true,
                sec_rss_enabled: true,
                kap_enabled: true,
                google_news_rss_enabled: true,
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: 120,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_server_and_cache_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl_ms, 60_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.ingestion.gdelt_enabled);
    }
}
