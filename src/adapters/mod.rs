pub mod config_store;
pub mod http_client;
pub mod model_store;
pub mod preferences;
#[cfg(feature = "whisper")]
pub mod whisper_cpp;

pub use config_store::TomlConfigStore;
pub use http_client::GuardedHttpClient;
pub use model_store::LocalModelStore;
pub use preferences::{JsonPreferenceStore, MemoryPreferenceStore};
#[cfg(feature = "whisper")]
pub use whisper_cpp::WhisperCppEngineFactory;
