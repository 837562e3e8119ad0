pub mod controller;
pub mod lifecycle;
pub mod pipeline;

pub use controller::AppController;
pub use lifecycle::{LifecycleEvent, ModelLifecycleManager};
pub use pipeline::{TranscriptionEvent, TranscriptionPipeline};
