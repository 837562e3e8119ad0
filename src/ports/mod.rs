pub mod config;
pub mod engine;
pub mod http;
pub mod model_store;
pub mod preferences;

pub use config::ConfigStore;
pub use engine::{DecodeOptions, EngineFactory, InferenceEngine};
pub use http::{ByteProgressCallback, HttpClient};
pub use model_store::{ModelStore, ProgressCallback};
pub use preferences::{PreferenceStore, LANGUAGE_KEY, SELECTED_TIER_KEY};
