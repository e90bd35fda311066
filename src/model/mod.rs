pub mod model_metadata;
pub mod model_storage;
pub mod download;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, print_metadata_info};
pub use download::{download_to_file, ensure_model_artifact};
pub use config::{AppConfig, DeviceType, ModelFormat, ModelSettings, ServerSettings};
