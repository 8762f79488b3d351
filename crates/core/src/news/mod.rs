pub mod entity;
pub mod port;

pub use entity::{
    ExtractedEntities, IngestReport, NewsCategory, NewsItem, NewsSource, Tag, TagAssociation,
    Ticker, TickerAssociation,
};
pub use port::{canonicalize_url, stable_id, NewsFeedClient, NewsStore};
