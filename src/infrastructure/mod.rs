pub mod logging;
pub mod storage;

pub use logging::init_logging;
pub use storage::{directory_size, StorageAccountant};
