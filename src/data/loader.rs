use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::batch::{Batch, BatchSource};
use crate::data::sequence_folder::SampleDataset;
use crate::error::{Error, Result};

/// Batches in flight per worker.
const PREFETCH: usize = 2;

/// Groups dataset samples into batches, optionally on worker threads.
///
/// Batch `k` of a pass is assembled by worker `k mod workers` and the
/// consumer reads the workers round-robin, so batches arrive in order
/// whatever the thread count.
pub struct DataLoader<D> {
    dataset: Arc<D>,
    batch_size: usize,
    workers: usize,
    shuffle: bool,
    seed: u64,
    pass: u64,
}

impl<D: SampleDataset + 'static> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize, workers: usize, shuffle: bool, seed: u64) -> Self {
        DataLoader {
            dataset: Arc::new(dataset),
            batch_size: batch_size.max(1),
            workers,
            shuffle,
            seed,
            pass: 0,
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sample indices of the next pass, grouped per batch.
    fn next_pass_order(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(mix(self.seed, self.pass, u64::MAX)));
        }
        order.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
    }
}

/// Per-sample augmentation seed derived from the run seed, the pass and the index.
fn mix(seed: u64, pass: u64, index: u64) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ pass.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ index.wrapping_mul(0x1656_67B1_9E37_79F9)
}

fn assemble<D: SampleDataset + ?Sized>(
    dataset: &D,
    indices: &[usize],
    seed: u64,
    pass: u64,
) -> Result<Batch> {
    let samples = indices
        .iter()
        .map(|&i| {
            let mut rng = StdRng::seed_from_u64(mix(seed, pass, i as u64));
            dataset.sample(i, &mut rng)
        })
        .collect::<Result<Vec<_>>>()?;
    Batch::collate(samples)
}

impl<D: SampleDataset + 'static> BatchSource for DataLoader<D> {
    fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let order = self.next_pass_order();
        let (seed, pass) = (self.seed, self.pass);
        self.pass += 1;

        if self.workers == 0 {
            let dataset = Arc::clone(&self.dataset);
            return Box::new(
                order
                    .into_iter()
                    .map(move |indices| assemble(dataset.as_ref(), &indices, seed, pass)),
            );
        }
        Box::new(WorkerStream::spawn(
            Arc::clone(&self.dataset),
            order,
            self.workers,
            seed,
            pass,
        ))
    }
}

/// One pass of batches produced by worker threads. Dropping it early closes
/// the channels and joins the workers.
struct WorkerStream {
    receivers: Vec<Receiver<Result<Batch>>>,
    handles: Vec<JoinHandle<()>>,
    next: usize,
    total: usize,
}

impl WorkerStream {
    fn spawn<D: SampleDataset + 'static>(
        dataset: Arc<D>,
        order: Vec<Vec<usize>>,
        workers: usize,
        seed: u64,
        pass: u64,
    ) -> WorkerStream {
        let total = order.len();
        let workers = workers.min(total).max(1);
        let order = Arc::new(order);
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, rx) = mpsc::sync_channel(PREFETCH);
            let dataset = Arc::clone(&dataset);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                Self::produce(dataset.as_ref(), &order, worker, workers, seed, pass, tx)
            }));
            receivers.push(rx);
        }
        debug!("pass {pass}: {total} batches over {workers} loader threads");

        WorkerStream {
            receivers,
            handles,
            next: 0,
            total,
        }
    }

    fn produce<D: SampleDataset + ?Sized>(
        dataset: &D,
        order: &[Vec<usize>],
        worker: usize,
        workers: usize,
        seed: u64,
        pass: u64,
        sink: SyncSender<Result<Batch>>,
    ) {
        for indices in order.iter().skip(worker).step_by(workers) {
            if sink.send(assemble(dataset, indices, seed, pass)).is_err() {
                // Consumer went away.
                break;
            }
        }
    }
}

impl Iterator for WorkerStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let worker = self.next % self.receivers.len();
        self.next += 1;
        Some(self.receivers[worker].recv().unwrap_or_else(|_| {
            Err(Error::DataSource(format!("loader thread {worker} exited early")))
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl Drop for WorkerStream {
    fn drop(&mut self) {
        self.receivers.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("a loader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batch::Sample;
    use crate::math::camera::Intrinsics;
    use crate::math::frame::Image;

    /// Sample `i` is a 1x1 image holding `i`.
    struct Counting(usize);

    impl SampleDataset for Counting {
        fn len(&self) -> usize {
            self.0
        }

        fn sample(&self, index: usize, _rng: &mut StdRng) -> Result<Sample> {
            let img = Image::filled(1, 1, 1, index as f64);
            Ok(Sample {
                target: img.clone(),
                references: vec![img.clone(), img],
                intrinsics: Intrinsics::identity(),
            })
        }
    }

    fn ids(batch: &Batch) -> Vec<usize> {
        batch
            .targets
            .iter()
            .map(|t| t.channels[0].get(0, 0) as usize)
            .collect()
    }

    #[test]
    fn threaded_pass_preserves_order() {
        let mut loader = DataLoader::new(Counting(10), 3, 3, false, 0);
        assert_eq!(loader.num_batches(), 4);
        let seen: Vec<Vec<usize>> = loader.batches().map(|b| ids(&b.unwrap())).collect();
        assert_eq!(seen, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]);
    }

    #[test]
    fn shuffled_passes_differ_but_cover_everything() {
        let mut loader = DataLoader::new(Counting(32), 4, 0, true, 5);
        let first: Vec<usize> = loader.batches().flat_map(|b| ids(&b.unwrap())).collect();
        let second: Vec<usize> = loader.batches().flat_map(|b| ids(&b.unwrap())).collect();
        assert_ne!(first, second);
        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn dropping_a_pass_early_joins_workers() {
        let mut loader = DataLoader::new(Counting(100), 2, 4, true, 1);
        let taken = loader.batches().take(3).count();
        assert_eq!(taken, 3);
        // A fresh pass still works after the early drop.
        assert_eq!(loader.batches().count(), 50);
    }
}
