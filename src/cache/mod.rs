// Time-windowed, request-coalescing cache of the upstream entity state

mod refresh;

pub use refresh::{CacheEntry, RefreshCache, REFRESH_WINDOW_SECS};
