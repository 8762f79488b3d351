use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use tickerflow_api::gateway::MarketGateway;
use tickerflow_api::server::{start_server, AppState, StorePing};
use tickerflow_core::common::time::RealClock;
use tickerflow_core::common::Clock;
use tickerflow_core::config::{AppConfig, ProviderThrottle};
use tickerflow_core::health::ingestion::IngestionStore;
use tickerflow_core::news::entity::NewsSource;
use tickerflow_core::news::port::NewsStore;
use tickerflow_core::store::entity::User;
use tickerflow_core::store::port::UserStore;
use tickerflow_feed::{CryptoClient, EquityTradeStreamClient, MarketDataClient, RssFeedClient};
use tickerflow_httpclient::{HostPolicy, HttpExecutor, RetryPolicy};
use tickerflow_market::{BatchMarketService, ChartService, DetailService, QuoteService};
use tickerflow_store::SqliteStore;
use tickerflow_ws::{Fanout, FanoutConfig};

const CRYPTO_REST_BASE_URL: &str = "https://api.binance.com";
const CRYPTO_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const TRADE_STREAM_WS_URL: &str = "wss://trades.example-market-data.com/ws";
const TRADE_STREAM_SERVER_SYMBOL_CAP: usize = 200;
const US_MARKET_DATA_BASE_URL: &str = "https://query1.finance.yahoo.com";
const BIST_MARKET_DATA_BASE_URL: &str = "https://query1.finance.yahoo.com";
const GDELT_FEED_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc?query=sourcelang:english&mode=artlist&format=rss";
const SEC_RSS_FEED_URL: &str = "https://www.sec.gov/cgi-bin/browse-edgar?action=getcompany&type=8-K&output=atom";
const KAP_FEED_URL: &str = "https://www.kap.org.tr/en/rss/kap";
const GOOGLE_NEWS_RSS_FEED_URL: &str = "https://news.google.com/rss/search?q=stock+market&hl=en-US&gl=US&ceid=US:en";

const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "change-me-now";

fn host_policy(throttle: ProviderThrottle, timeout_ms: u64) -> HostPolicy {
    HostPolicy {
        concurrency: throttle.concurrency,
        min_delay_ms: throttle.min_delay_ms,
        timeout: Duration::from_millis(timeout_ms),
    }
}

fn retry_policy(app_config: &AppConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: app_config.http_client.retry_count,
        base_ms: app_config.http_client.retry_base_ms,
        cap_ms: app_config.http_client.retry_cap_ms,
    }
}

/// 按 `app_config.throttle` 给每个上游 host 挂上对应的限流策略，未单独覆盖
/// 的 host 落在 `throttle.default` 上。
fn build_executor(app_config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<HttpExecutor> {
    let default_policy = host_policy(app_config.throttle.default, app_config.http_client.timeout_ms);
    let retry = retry_policy(app_config);

    let executor = HttpExecutor::new(
        Client::new(),
        default_policy,
        retry,
        clock,
        app_config.http_client.cache_ttl_ms,
    )
    .with_host_policy(
        HttpExecutor::url_host(CRYPTO_REST_BASE_URL),
        host_policy(app_config.throttle.crypto, app_config.http_client.timeout_ms),
    )
    .with_host_policy(
        HttpExecutor::url_host(US_MARKET_DATA_BASE_URL),
        host_policy(app_config.throttle.market_data, app_config.http_client.timeout_ms),
    )
    .with_host_policy(
        HttpExecutor::url_host(GDELT_FEED_URL),
        host_policy(app_config.throttle.news, app_config.http_client.timeout_ms),
    )
    .with_host_policy(
        HttpExecutor::url_host(SEC_RSS_FEED_URL),
        host_policy(app_config.throttle.news, app_config.http_client.timeout_ms),
    )
    .with_host_policy(
        HttpExecutor::url_host(KAP_FEED_URL),
        host_policy(app_config.throttle.news, app_config.http_client.timeout_ms),
    )
    .with_host_policy(
        HttpExecutor::url_host(GOOGLE_NEWS_RSS_FEED_URL),
        host_policy(app_config.throttle.news, app_config.http_client.timeout_ms),
    );

    Arc::new(executor)
}

#[allow(clippy::too_many_arguments)]
fn build_gateway<C>(
    name: &str,
    client: Arc<C>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    min_delay_ms: u64,
    app_config: &AppConfig,
) -> Arc<MarketGateway<C>>
where
    C: tickerflow_core::market::port::QuoteClient
        + tickerflow_core::market::port::ChartClient
        + tickerflow_core::market::port::DetailClient,
{
    let min_delay = Duration::from_millis(min_delay_ms);
    let failure_threshold = app_config.circuit_breaker.failure_threshold;
    let recovery_timeout = Duration::from_millis(app_config.circuit_breaker.recovery_timeout_ms);
    let cache_max_size = Some(app_config.cache.max_size);
    let cache_grace_ms = app_config.cache.grace_ms;

    let quote = Arc::new(QuoteService::new(
        format!("{name}-quote"),
        client.clone(),
        clock.clone(),
        concurrency,
        min_delay,
        failure_threshold,
        recovery_timeout,
        cache_max_size,
        cache_grace_ms,
        false,
    ));
    let chart = Arc::new(ChartService::new(
        format!("{name}-chart"),
        client.clone(),
        clock.clone(),
        concurrency,
        min_delay,
        failure_threshold,
        recovery_timeout,
        cache_max_size,
        cache_grace_ms,
    ));
    let detail = Arc::new(DetailService::new(
        format!("{name}-detail"),
        client,
        clock.clone(),
        concurrency,
        min_delay,
        failure_threshold,
        recovery_timeout,
        cache_max_size,
        cache_grace_ms,
    ));
    let batch = Arc::new(BatchMarketService::new(quote.clone(), clock));

    Arc::new(MarketGateway::new(quote, chart, detail, batch))
}

/// 首次启动且用户表为空时，创建一个必须改密的默认管理员账号，避免裸奔上线。
async fn bootstrap_admin_user(store: &SqliteStore, bcrypt_rounds: u32) -> Result<(), Box<dyn std::error::Error>> {
    if store.get_by_username(DEFAULT_ADMIN_USERNAME).await?.is_some() {
        return Ok(());
    }

    let password_hash = bcrypt::hash(DEFAULT_ADMIN_PASSWORD, bcrypt_rounds)?;
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: DEFAULT_ADMIN_USERNAME.to_string(),
        password_hash,
        is_admin: true,
        must_change_password: true,
        created_at: chrono::Utc::now(),
    };
    store.save(&user).await?;
    info!("bootstrapped default admin user (must change password on first login)");
    Ok(())
}

/// 按 `app_config.ingestion` 的开关构造启用的新闻采集客户端集合。
fn build_news_feeds(
    app_config: &AppConfig,
    executor: Arc<HttpExecutor>,
    client: Client,
) -> HashMap<String, Arc<RssFeedClient>> {
    let mut feeds = HashMap::new();
    if app_config.ingestion.gdelt_enabled {
        feeds.insert(
            "gdelt".to_string(),
            Arc::new(RssFeedClient::new(executor.clone(), client.clone(), GDELT_FEED_URL, NewsSource::Gdelt)),
        );
    }
    if app_config.ingestion.sec_rss_enabled {
        feeds.insert(
            "sec_rss".to_string(),
            Arc::new(RssFeedClient::new(executor.clone(), client.clone(), SEC_RSS_FEED_URL, NewsSource::SecRss)),
        );
    }
    if app_config.ingestion.kap_enabled {
        feeds.insert(
            "kap".to_string(),
            Arc::new(RssFeedClient::new(executor.clone(), client.clone(), KAP_FEED_URL, NewsSource::Kap)),
        );
    }
    if app_config.ingestion.google_news_rss_enabled {
        feeds.insert(
            "google_news_rss".to_string(),
            Arc::new(RssFeedClient::new(
                executor,
                client,
                GOOGLE_NEWS_RSS_FEED_URL,
                NewsSource::GoogleNewsRss,
            )),
        );
    }
    feeds
}

/// 每个启用的新闻源各起一个定时采集任务，间隔固定为 10 分钟。
fn spawn_ingestion_schedulers(news_feeds: HashMap<String, Arc<RssFeedClient>>, store: Arc<SqliteStore>) {
    const INGEST_INTERVAL: Duration = Duration::from_secs(600);
    const CHUNK_SIZE: usize = 50;

    for (name, feed) in news_feeds {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(INGEST_INTERVAL);
            loop {
                ticker.tick().await;
                let known_symbols = match store.known_symbols().await {
                    Ok(symbols) => symbols,
                    Err(err) => {
                        tracing::warn!("collector {name}: failed to load known symbols: {err}");
                        continue;
                    }
                };
                match tickerflow_news::run_collector(feed.as_ref(), store.as_ref(), CHUNK_SIZE, Some(&known_symbols)).await {
                    Ok(report) => info!("collector {name} finished: {:?}", report),
                    Err(err) => tracing::warn!("collector {name} failed: {err}"),
                }
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_appender = tracing_appender::rolling::daily("logs", "tickerflow.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(
            std::io::stdout
                .with_max_level(tracing::Level::INFO)
                .and(non_blocking.with_max_level(tracing::Level::DEBUG)),
        )
        .with_ansi(true)
        .init();

    info!("tickerflow starting...");

    let config_file_path = std::path::Path::new("config.toml");
    let mut builder = config::Config::builder();

    if config_file_path.exists() {
        builder = builder.add_source(config::File::from(config_file_path).required(true));
    } else if std::path::Path::new("config").exists() {
        builder = builder.add_source(config::File::with_name("config").required(true));
    }

    builder = builder.add_source(config::Environment::with_prefix("TICKERFLOW").separator("_"));

    let config_val = builder.build()?;

    let app_config: AppConfig = if config_file_path.exists()
        || std::path::Path::new("config").exists()
        || std::env::var("TICKERFLOW_SERVER_PORT").is_ok()
    {
        config_val.try_deserialize()?
    } else {
        AppConfig::default()
    };

    info!("configuration loaded: {:?}", app_config);

    let store = Arc::new(SqliteStore::connect(&app_config.database.url).await?);
    bootstrap_admin_user(&store, app_config.auth.bcrypt_rounds).await?;

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let executor = build_executor(&app_config, clock.clone());
    let http_client = Client::new();

    let crypto_client = Arc::new(CryptoClient::new(
        executor.clone(),
        http_client.clone(),
        CRYPTO_REST_BASE_URL,
        CRYPTO_WS_URL,
    ));
    crypto_client.spawn_supervisor();

    let us_client = Arc::new(MarketDataClient::new(executor.clone(), http_client.clone(), US_MARKET_DATA_BASE_URL));
    let bist_client = Arc::new(MarketDataClient::new(executor.clone(), http_client.clone(), BIST_MARKET_DATA_BASE_URL));

    let crypto_gateway = build_gateway(
        "crypto",
        crypto_client.clone(),
        clock.clone(),
        app_config.throttle.crypto.concurrency,
        app_config.throttle.crypto.min_delay_ms,
        &app_config,
    );
    let us_gateway = build_gateway(
        "us",
        us_client,
        clock.clone(),
        app_config.throttle.market_data.concurrency,
        app_config.throttle.market_data.min_delay_ms,
        &app_config,
    );
    let bist_gateway = build_gateway(
        "bist",
        bist_client,
        clock,
        app_config.throttle.market_data.concurrency,
        app_config.throttle.market_data.min_delay_ms,
        &app_config,
    );

    let crypto_fanout = Fanout::new("crypto-stream", crypto_client, FanoutConfig::default());
    let tick_loop_fanout = crypto_fanout.clone();
    tokio::spawn(async move { tick_loop_fanout.spawn_tick_loop().await });

    let trade_stream_client = Arc::new(EquityTradeStreamClient::new(TRADE_STREAM_WS_URL));
    trade_stream_client.spawn_supervisor();
    let trade_fanout = Fanout::new(
        "equity-trade-stream",
        trade_stream_client,
        FanoutConfig {
            server_symbol_cap: Some(TRADE_STREAM_SERVER_SYMBOL_CAP),
            ..FanoutConfig::default()
        },
    );
    let trade_tick_loop_fanout = trade_fanout.clone();
    tokio::spawn(async move { trade_tick_loop_fanout.spawn_tick_loop().await });

    let news_feeds = build_news_feeds(&app_config, executor.clone(), http_client);
    spawn_ingestion_schedulers(news_feeds.clone(), store.clone());

    let store_for_ping = store.clone();
    let store_ping: StorePing = Arc::new(move || {
        let store = store_for_ping.clone();
        Box::pin(async move { store.ping().await })
    });

    let user_store: Arc<dyn UserStore> = store.clone();
    let news_store: Arc<dyn NewsStore> = store.clone();
    let ingestion_store: Arc<dyn IngestionStore> = store.clone();

    let app_state = AppState {
        config: Arc::new(app_config.clone()),
        user_store,
        store: store.clone(),
        store_ping,
        crypto: crypto_gateway,
        us: us_gateway,
        bist: bist_gateway,
        crypto_fanout,
        trade_fanout,
        http_executor: executor,
        news_store,
        ingestion_store,
        news_feeds,
    };

    let bind_addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        if let Err(err) = start_server(app_state, &bind_addr_clone).await {
            tracing::error!("API server failed: {err}");
        }
    });

    info!("tickerflow is fully running on {bind_addr}. Waiting for signals...");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting.");

    Ok(())
}
