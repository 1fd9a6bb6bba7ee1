pub mod augment;
pub mod batch;
pub mod loader;
pub mod sequence_folder;

pub use augment::Augmentation;
pub use batch::{Batch, BatchSource, Sample};
pub use loader::DataLoader;
pub use sequence_folder::{load_frame, SampleDataset, SequenceFolder, Split};
