pub mod cli;
pub mod classify_commands;
pub mod error;
pub mod knowledge;
pub mod labels;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod types;

pub use error::{ClassifierError, ConfigError, InvalidImageError, ModelDownloadError, ModelLoadError};
pub use pipeline::ClassificationPipeline;
pub use types::{Classification, PredictionResult};
