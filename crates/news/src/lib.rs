//! # tickerflow-news
//!
//! 新闻摄入管线：批量去重/合并/插入更新，以及确定性打标（代码/标签抽取）。
//! 两者都只依赖 [`tickerflow_core`] 暴露的端口与纯函数，不关心具体存储实现。

pub mod collector;
pub mod ingest;
pub mod tagger;

pub use collector::run_collector;
pub use ingest::{default_chunk_size, dedup_batch, run as run_ingest};
pub use tagger::extract as extract_entities;
