//! Upstream market-data access: transport, rate limiting, endpoint adapters.

pub mod coingecko;
pub mod fetcher;
pub mod rate_limit;
pub mod transport;

pub use coingecko::{ChartPoint, CoinDetail, CoinGeckoClient, MarketEntry, DEFAULT_BASE_URL};
pub use fetcher::{RateLimitedFetcher, UpstreamError, UpstreamErrorKind};
pub use rate_limit::{RateLimitPolicy, RateLimitState, Sleeper, ThreadSleeper};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
