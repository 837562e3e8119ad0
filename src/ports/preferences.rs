use crate::domain::DomainError;

/// Key of the last tier that finished loading.
pub const SELECTED_TIER_KEY: &str = "selected_model_tier";

/// Key of the preferred transcription language.
pub const LANGUAGE_KEY: &str = "language";

/// Key-value store for user preferences owned by the host application.
///
/// The core only reads and writes string values through this interface.
pub trait PreferenceStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), DomainError>;

    /// Remove `key`.
    fn remove(&self, key: &str) -> Result<(), DomainError>;
}
