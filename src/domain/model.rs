use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Default location of the ggml model files.
pub const DEFAULT_MODEL_BASE_URL: &str =
    "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Model size/accuracy preset offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

/// Static catalog row for a tier.
#[derive(Debug)]
struct CatalogEntry {
    display_name: &'static str,
    storage_identifier: &'static str,
    file_name: &'static str,
    estimated_size_bytes: u64,
    description: &'static str,
}

const MIB: u64 = 1024 * 1024;

const CATALOG: [CatalogEntry; 5] = [
    CatalogEntry {
        display_name: "Tiny",
        storage_identifier: "whisper-tiny",
        file_name: "ggml-tiny.bin",
        estimated_size_bytes: 75 * MIB,
        description: "Fastest, lowest accuracy",
    },
    CatalogEntry {
        display_name: "Base",
        storage_identifier: "whisper-base",
        file_name: "ggml-base.bin",
        estimated_size_bytes: 142 * MIB,
        description: "Fast with reasonable accuracy",
    },
    CatalogEntry {
        display_name: "Small",
        storage_identifier: "whisper-small",
        file_name: "ggml-small.bin",
        estimated_size_bytes: 466 * MIB,
        description: "Good balance of speed and accuracy",
    },
    CatalogEntry {
        display_name: "Medium",
        storage_identifier: "whisper-medium",
        file_name: "ggml-medium.bin",
        estimated_size_bytes: 1_462 * MIB,
        description: "High accuracy, slower",
    },
    CatalogEntry {
        display_name: "Large",
        storage_identifier: "whisper-large-v3",
        file_name: "ggml-large-v3.bin",
        estimated_size_bytes: 2_952 * MIB,
        description: "Best accuracy, slowest and largest",
    },
];

impl ModelTier {
    /// All tiers, smallest first.
    pub const ALL: [ModelTier; 5] = [
        ModelTier::Tiny,
        ModelTier::Base,
        ModelTier::Small,
        ModelTier::Medium,
        ModelTier::Large,
    ];

    fn entry(&self) -> &'static CatalogEntry {
        &CATALOG[*self as usize]
    }

    /// Stable identifier used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        self.entry().display_name
    }

    /// Short description for settings screens.
    pub fn description(&self) -> &'static str {
        self.entry().description
    }

    /// Approximate download size. Only meant for UI messaging.
    pub fn estimated_size_bytes(&self) -> u64 {
        self.entry().estimated_size_bytes
    }

    /// Human-readable approximate download size ("142 MB", "1.4 GB").
    pub fn size_label(&self) -> String {
        let bytes = self.estimated_size_bytes();
        if bytes >= 1024 * MIB {
            format!("{:.1} GB", bytes as f64 / (1024 * MIB) as f64)
        } else {
            format!("{} MB", bytes / MIB)
        }
    }

    /// Descriptor derived from the catalog.
    pub fn descriptor(&self) -> ModelDescriptor {
        let entry = self.entry();
        ModelDescriptor {
            tier: *self,
            storage_identifier: entry.storage_identifier,
            file_name: entry.file_name,
            estimated_size_bytes: entry.estimated_size_bytes,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(ModelTier::Tiny),
            "base" => Ok(ModelTier::Base),
            "small" => Ok(ModelTier::Small),
            "medium" => Ok(ModelTier::Medium),
            "large" | "large-v3" => Ok(ModelTier::Large),
            other => Err(DomainError::ModelNotFound(other.to_string())),
        }
    }
}

/// Storage and download facts for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub tier: ModelTier,
    /// Directory name under the models directory.
    pub storage_identifier: &'static str,
    /// Model file name inside the storage directory.
    pub file_name: &'static str,
    pub estimated_size_bytes: u64,
}

impl ModelDescriptor {
    /// Download URL for the model file under `base_url`.
    pub fn download_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name)
    }
}

/// Advisory progress of a download or switch.
///
/// `Indeterminate` is used when the transfer cannot report its size and
/// while an engine is being constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Progress {
    Fraction(f32),
    Indeterminate,
}

impl Progress {
    /// Smallest step that is worth publishing.
    const STEP: f32 = 0.001;

    pub fn fraction(&self) -> Option<f32> {
        match self {
            Progress::Fraction(f) => Some(*f),
            Progress::Indeterminate => None,
        }
    }

    /// Progress reported by a transfer of `downloaded` out of `total` bytes.
    pub fn from_bytes(downloaded: u64, total: u64) -> Self {
        if total == 0 {
            Progress::Indeterminate
        } else {
            Progress::Fraction((downloaded as f64 / total as f64).clamp(0.0, 1.0) as f32)
        }
    }

    /// Combine with a newer report, never moving backwards.
    ///
    /// Returns `None` when the report does not change what should be shown.
    pub fn advance(&self, next: Progress) -> Option<Progress> {
        match (self, next) {
            (_, Progress::Indeterminate) => None,
            (Progress::Indeterminate, Progress::Fraction(f)) => {
                Some(Progress::Fraction(f.clamp(0.0, 1.0)))
            }
            (Progress::Fraction(current), Progress::Fraction(f)) => {
                let f = f.clamp(0.0, 1.0);
                if f - current >= Self::STEP || (f >= 1.0 && *current < 1.0) {
                    Some(Progress::Fraction(f))
                } else {
                    None
                }
            }
        }
    }
}

/// State of the selected model as seen by callers.
///
/// Transitions:
/// - NotDownloaded -> Downloading -> Loading -> Ready (load)
/// - Downloaded -> Loading -> Ready (load)
/// - Downloading -> NotDownloaded (cancel_download)
/// - Downloading/Loading -> Error (failure)
/// - Ready -> Switching -> Ready (select another tier; old tier kept on failure or cancel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ModelStatus {
    NotDownloaded,
    Downloading { progress: Progress },
    Downloaded,
    Loading,
    Ready,
    Switching { target: ModelTier, progress: Progress },
    Error { message: String },
}

impl ModelStatus {
    /// Whether a download, load or switch is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ModelStatus::Downloading { .. } | ModelStatus::Loading | ModelStatus::Switching { .. }
        )
    }

    /// Progress to display, if any.
    pub fn progress(&self) -> Option<Progress> {
        match self {
            ModelStatus::Downloading { progress } | ModelStatus::Switching { progress, .. } => {
                Some(*progress)
            }
            _ => None,
        }
    }
}

/// Everything the UI needs to render the model state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerSnapshot {
    pub status: ModelStatus,
    /// Tier the status refers to.
    pub selected_tier: ModelTier,
    /// Tier of the engine currently serving requests.
    pub active_tier: Option<ModelTier>,
}

/// Download progress reported by the model store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub tier: ModelTier,
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes to download (0 if unknown).
    pub total_bytes: u64,
}

impl DownloadProgress {
    pub fn new(tier: ModelTier) -> Self {
        Self {
            tier,
            bytes_downloaded: 0,
            total_bytes: 0,
        }
    }

    pub fn update(&mut self, downloaded: u64, total: u64) {
        self.bytes_downloaded = downloaded;
        self.total_bytes = total;
    }

    pub fn progress(&self) -> Progress {
        Progress::from_bytes(self.bytes_downloaded, self.total_bytes)
    }
}

/// Record written next to an installed model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    pub tier: ModelTier,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_roundtrip_through_str() {
        for tier in ModelTier::ALL {
            assert_eq!(tier.as_str().parse::<ModelTier>().unwrap(), tier);
        }
        assert_eq!("Large-V3".parse::<ModelTier>().unwrap(), ModelTier::Large);
        assert!("huge".parse::<ModelTier>().is_err());
    }

    #[test]
    fn test_catalog_is_ordered_by_size() {
        let sizes: Vec<u64> = ModelTier::ALL.iter().map(|t| t.estimated_size_bytes()).collect();
        assert!(sizes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ModelTier::Base.display_name(), "Base");
        assert_eq!(ModelTier::Base.size_label(), "142 MB");
        assert_eq!(ModelTier::Large.size_label(), "2.9 GB");
    }

    #[test]
    fn test_descriptor_download_url() {
        let descriptor = ModelTier::Small.descriptor();
        assert_eq!(descriptor.storage_identifier, "whisper-small");
        assert_eq!(
            descriptor.download_url("https://example.com/models/"),
            "https://example.com/models/ggml-small.bin"
        );
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let p = Progress::Fraction(0.5);
        assert_eq!(p.advance(Progress::Fraction(0.4)), None);
        assert_eq!(p.advance(Progress::Indeterminate), None);
        assert_eq!(p.advance(Progress::Fraction(0.6)), Some(Progress::Fraction(0.6)));
        assert_eq!(
            Progress::Indeterminate.advance(Progress::Fraction(0.1)),
            Some(Progress::Fraction(0.1))
        );
        assert_eq!(
            Progress::Fraction(0.9999).advance(Progress::Fraction(1.0)),
            Some(Progress::Fraction(1.0))
        );
    }

    #[test]
    fn test_download_progress() {
        let mut progress = DownloadProgress::new(ModelTier::Base);
        assert_eq!(progress.progress(), Progress::Indeterminate);
        progress.update(50, 100);
        assert_eq!(progress.progress(), Progress::Fraction(0.5));
    }

    #[test]
    fn test_status_serialization() {
        let status = ModelStatus::Switching {
            target: ModelTier::Small,
            progress: Progress::Fraction(0.25),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"switching\""));
        assert!(json.contains("\"small\""));
        assert!(status.is_busy());
        assert!(!ModelStatus::Ready.is_busy());
    }
}
