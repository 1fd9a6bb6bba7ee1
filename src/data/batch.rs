use crate::error::{Error, Result};
use crate::math::camera::Intrinsics;
use crate::math::frame::Image;

/// One training example: a target frame, its neighbouring reference frames
/// and the camera intrinsics shared by all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub target: Image,
    pub references: Vec<Image>,
    pub intrinsics: Intrinsics,
}

/// A collated mini-batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// One per sample.
    pub targets: Vec<Image>,
    /// Indexed `[reference][sample]`.
    pub references: Vec<Vec<Image>>,
    pub intrinsics: Vec<Intrinsics>,
    pub intrinsics_inv: Vec<Intrinsics>,
}

impl Batch {
    /// Stacks samples into a batch. Every sample needs the same number of references.
    pub fn collate(samples: Vec<Sample>) -> Result<Batch> {
        let num_refs = samples
            .first()
            .map(|s| s.references.len())
            .ok_or_else(|| Error::DataSource("cannot collate an empty batch".into()))?;

        let mut batch = Batch {
            targets: Vec::with_capacity(samples.len()),
            references: (0..num_refs).map(|_| Vec::with_capacity(samples.len())).collect(),
            intrinsics: Vec::with_capacity(samples.len()),
            intrinsics_inv: Vec::with_capacity(samples.len()),
        };
        for sample in samples {
            if sample.references.len() != num_refs {
                return Err(Error::shape("sample references", num_refs, sample.references.len()));
            }
            batch.intrinsics_inv.push(sample.intrinsics.inverse()?);
            batch.intrinsics.push(sample.intrinsics);
            batch.targets.push(sample.target);
            for (slot, reference) in batch.references.iter_mut().zip(sample.references) {
                slot.push(reference);
            }
        }
        Ok(batch)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn num_references(&self) -> usize {
        self.references.len()
    }
}

/// A re-iterable stream of batches, one full pass per call to `batches`.
pub trait BatchSource {
    /// Batches in one full pass.
    fn num_batches(&self) -> usize;

    /// Starts a new pass. Shuffling sources reshuffle here.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// In-memory batches, replayed in order on every pass.
impl BatchSource for Vec<Batch> {
    fn num_batches(&self) -> usize {
        self.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}
