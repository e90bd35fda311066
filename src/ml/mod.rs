pub mod ml_model;
pub mod preprocess;
pub mod resolver;
pub mod inference;

pub use ml_model::{LeafClassifier, ModelConfig, NUM_CLASSES, IMAGE_SIZE, CLASS_NAMES};
pub use preprocess::{preprocess, preprocess_bytes, ImageTensor, INPUT_SHAPE};
pub use resolver::{argmax, resolve};
pub use inference::{
    load_classifier, save_archive, save_initial_archive, save_single_file, ArchiveModelLoader,
    ImageClassifier, InferenceEngine, ModelCache, ModelLoader, SingleFileModelLoader,
};
