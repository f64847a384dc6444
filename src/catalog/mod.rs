//! ASR engine catalog.
//!
//! * [`EngineCatalog`]: async trait listing engines and their parameter schemas.
//! * [`HttpEngineCatalog`]: reqwest-backed implementation.
//! * [`merge_settings`]: reconciles a fetched schema with persisted values.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use sentio_wakeword::catalog::{streaming_engines, EngineCatalog, HttpEngineCatalog};
//! use sentio_wakeword::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let catalog = HttpEngineCatalog::from_config(&config.server);
//!
//!     let engines = streaming_engines(catalog.list_engines().await.unwrap());
//!     for name in engines.keys() {
//!         let params = catalog.engine_params(name).await.unwrap();
//!         println!("{name}: {} params", params.len());
//!     }
//! }
//! ```

pub mod client;
pub mod types;

pub use client::{CatalogError, EngineCatalog, HttpEngineCatalog};
pub use types::{
    merge_settings, streaming_engines, EngineDescriptor, EngineMeta, EngineParamDescriptor,
    EngineSettings, InferType, ParamValue,
};
