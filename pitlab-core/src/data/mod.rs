//! Data layer: aligned asset panels and the content-addressable factor cache.

pub mod cache;
pub mod panel;

pub use cache::{CacheEntryMeta, CacheStats, FactorValueCache};
pub use panel::{AssetPanel, PanelError};
