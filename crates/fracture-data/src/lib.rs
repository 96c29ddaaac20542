pub mod loader;
pub mod save_worker;
pub mod service;
pub mod storage;

pub use loader::{DataLoadError, load_settings, load_settings_dir};
pub use service::{GeneratorService, ServiceError};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
