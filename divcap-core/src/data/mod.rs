//! Market data: provider capability, Yahoo Finance, circuit breaker, fetch
//! cache, and ticker universes.

pub mod cache;
pub mod circuit_breaker;
pub mod memory;
pub mod provider;
pub mod universe;
pub mod yahoo;

pub use cache::{CacheKey, CacheStats, FetchCache};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use memory::InMemoryProvider;
pub use provider::{FetchProgress, MarketDataProvider, NoProgress, ProviderError, TracingProgress};
pub use universe::Universe;
pub use yahoo::YahooProvider;
