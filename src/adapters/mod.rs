pub mod embeddings;
pub mod hyperliquid;
pub mod news;
pub mod postgres;

pub use embeddings::{l2_normalize, Embedder, HttpEmbedder};
pub use hyperliquid::{
    AssetCtx, AssetInfo, AssetMeta, ExchangeAction, ExchangeResponse, FundingEntry,
    HyperliquidClient, L2Book, OrderAck, RawCandle, RawTrade, UniverseMeta,
};
pub use news::{build_sources, CryptoCompareSource, CryptoPanicSource, NewsSource};
pub use postgres::{CycleStore, PostgresStore};
