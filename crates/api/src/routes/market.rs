//! # 行情端点
//!
//! 按市场（crypto/us/bist）分发到对应的 [`crate::gateway::MarketGateway`]。
//! 符号批量输入的规范形式是逗号拼接的查询字符串（见 `SPEC_FULL.md` 的
//! Open Question 决议），不接受 JSON body 数组。

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;
use tickerflow_core::common::{Interval, Market, Range, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::market::port::QuoteClient;
use tickerflow_market::QuoteService;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ChartResponse, DetailResponse, MarketScanResponse, QuoteResponse, QuotesResponse, SuccessEnvelope};

const MAX_BATCH_SYMBOLS: usize = 500;

fn parse_market(raw: &str) -> Result<Market, ApiError> {
    Market::from_str(raw).map_err(ApiError::from)
}

fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, CoreError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::parse)
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    pub symbols: String,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub symbol: String,
    pub interval: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub symbol: String,
}

/// `GET /<market>/quote?symbol=` — 单个符号的实时报价。
#[utoipa::path(get, path = "/{market}/quote", tag = "market", params(("market" = String, Path), ("symbol" = String, Query)), responses((status = 200, body = SuccessEnvelope<QuoteResponse>)))]
pub async fn quote(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<SuccessEnvelope<QuoteResponse>>, ApiError> {
    let market = parse_market(&market)?;
    let symbol = Symbol::parse(&query.symbol).map_err(ApiError::from)?;

    let q = match market {
        Market::Crypto => state.crypto.quote.get(&symbol).await,
        Market::Us => state.us.quote.get(&symbol).await,
        Market::Bist => state.bist.quote.get(&symbol).await,
    }?;
    Ok(Json(SuccessEnvelope::new(QuoteResponse::from(q))))
}

/// `GET /<market>/quotes?symbols=a,b,c` — 批量报价，部分失败不影响整批。
#[utoipa::path(get, path = "/{market}/quotes", tag = "market", params(("market" = String, Path), ("symbols" = String, Query)), responses((status = 200, body = SuccessEnvelope<QuotesResponse>)))]
pub async fn quotes(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<SuccessEnvelope<QuotesResponse>>, ApiError> {
    let market = parse_market(&market)?;
    let symbols = parse_symbols(&query.symbols).map_err(ApiError::from)?;
    if symbols.len() > MAX_BATCH_SYMBOLS {
        return Err(CoreError::TooManySymbols { requested: symbols.len(), max: MAX_BATCH_SYMBOLS }.into());
    }

    let mut values = Vec::with_capacity(symbols.len());
    let mut errors = Vec::new();
    match market {
        Market::Crypto => fetch_quotes(&state.crypto.quote, &symbols, &mut values, &mut errors).await,
        Market::Us => fetch_quotes(&state.us.quote, &symbols, &mut values, &mut errors).await,
        Market::Bist => fetch_quotes(&state.bist.quote, &symbols, &mut values, &mut errors).await,
    }

    Ok(Json(SuccessEnvelope::new(QuotesResponse {
        quotes: values.into_iter().map(QuoteResponse::from).collect(),
        errors: errors.into_iter().map(Into::into).collect(),
    })))
}

async fn fetch_quotes<C: QuoteClient>(
    service: &QuoteService<C>,
    symbols: &[Symbol],
    values: &mut Vec<tickerflow_core::market::entity::Quote>,
    errors: &mut Vec<tickerflow_core::market::entity::SymbolError>,
) {
    for symbol in symbols {
        match service.get(symbol).await {
            Ok(q) => values.push(q),
            Err(err) => errors.push(tickerflow_core::market::entity::SymbolError {
                symbol: symbol.clone(),
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// `GET /<market>/chart?symbol=&interval=&range=` — K 线序列。
#[utoipa::path(get, path = "/{market}/chart", tag = "market", params(("market" = String, Path), ("symbol" = String, Query), ("interval" = Option<String>, Query), ("range" = Option<String>, Query)), responses((status = 200, body = SuccessEnvelope<ChartResponse>)))]
pub async fn chart(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<SuccessEnvelope<ChartResponse>>, ApiError> {
    let market = parse_market(&market)?;
    let symbol = Symbol::parse(&query.symbol).map_err(ApiError::from)?;
    let interval = query
        .interval
        .as_deref()
        .map(Interval::from_str)
        .transpose()
        .map_err(ApiError::from)?
        .unwrap_or(Interval::Day1);
    let range = query
        .range
        .as_deref()
        .map(Range::from_str)
        .transpose()
        .map_err(ApiError::from)?
        .unwrap_or(Range::Month1);

    let c = match market {
        Market::Crypto => state.crypto.chart.get(&symbol, interval, range).await,
        Market::Us => state.us.chart.get(&symbol, interval, range).await,
        Market::Bist => state.bist.chart.get(&symbol, interval, range).await,
    }?;
    Ok(Json(SuccessEnvelope::new(ChartResponse::from(c))))
}

/// `GET /<market>/detail?symbol=` — 基本面/元数据详情。
#[utoipa::path(get, path = "/{market}/detail", tag = "market", params(("market" = String, Path), ("symbol" = String, Query)), responses((status = 200, body = SuccessEnvelope<DetailResponse>)))]
pub async fn detail(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<SuccessEnvelope<DetailResponse>>, ApiError> {
    let market = parse_market(&market)?;
    let symbol = Symbol::parse(&query.symbol).map_err(ApiError::from)?;

    let d = match market {
        Market::Crypto => state.crypto.detail.get(&symbol).await,
        Market::Us => state.us.detail.get(&symbol).await,
        Market::Bist => state.bist.detail.get(&symbol).await,
    }?;
    Ok(Json(SuccessEnvelope::new(DetailResponse::from(d))))
}

/// `GET /markets/<market>?symbols=a,b,c` — 整个市场的批量扫描。
#[utoipa::path(get, path = "/markets/{market}", tag = "market", params(("market" = String, Path), ("symbols" = String, Query)), responses((status = 200, body = SuccessEnvelope<MarketScanResponse>)))]
pub async fn scan(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<SuccessEnvelope<MarketScanResponse>>, ApiError> {
    let market_tag = parse_market(&market)?;
    let symbols = parse_symbols(&query.symbols).map_err(ApiError::from)?;
    let tag = market_tag.to_string();

    let scan = match market_tag {
        Market::Crypto => state.crypto.batch.scan(&tag, &symbols).await,
        Market::Us => state.us.batch.scan(&tag, &symbols).await,
        Market::Bist => state.bist.batch.scan(&tag, &symbols).await,
    }?;
    Ok(Json(SuccessEnvelope::new(MarketScanResponse::from(scan))))
}
