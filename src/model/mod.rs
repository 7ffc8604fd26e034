pub mod config;
pub mod label_set;
pub mod model_metadata;
pub mod model_storage;

pub use config::{
    AppConfig, AugmentationSettings, BackboneVariant, DeviceType, PathSettings, PreprocessSettings,
    TrainingSettings, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE,
};
pub use label_set::{LabelSet, DEFAULT_SPECIES};
pub use model_metadata::{print_metadata_info, ModelMetadata};
pub use model_storage::{load_metadata, load_model_with_metadata, save_model_with_metadata};
