//! External cache plugin over the in-memory content-addressed cache.
//!
//! One process hosts one [`ram_cache::RamCacheManager`] instance and
//! serves it to out-of-process clients through the callback vocabulary in
//! [`facade`]. This crate owns everything externally facing: the callback
//! facade and its transaction/listing tables, configuration, logging, and
//! the transport endpoint lifecycle. The wire framing of the client IPC
//! belongs to the host library driving the callbacks and is not part of
//! this crate.

pub mod config;
pub mod facade;
pub mod listing;
pub mod logging;
pub mod transport;

pub use config::{Config, ConfigError};
pub use facade::{CacheCallbacks, Capabilities, PluginInfo, RamCachePlugin};
pub use listing::Listing;
pub use transport::{Endpoint, Locator};
