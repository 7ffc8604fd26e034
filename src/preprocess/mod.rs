pub mod augmentation;
pub mod transform;

pub use augmentation::Augmenter;
pub use transform::{ImageTensor, Preprocessor};
