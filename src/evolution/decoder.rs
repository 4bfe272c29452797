use crate::consts::NUMBER_OF_OPTIMIZATION_OBJECTIVES;
use crate::evolution::archive::Individual;
use crate::evolution::EvolutionError;
use crate::instance::Instance;
use crate::portfolio::{evaluate_into, normalize_key_into};
use nalgebra::DVector;
use rayon::prelude::*;

/// Scratch state owned by one decode worker.
#[derive(Debug, Clone)]
struct DecodeSlot {
    weights: DVector<f64>,
    product: DVector<f64>,
    objectives: Vec<f64>,
}

impl DecodeSlot {
    fn new(num_assets: usize) -> Self {
        DecodeSlot {
            weights: DVector::zeros(num_assets),
            product: DVector::zeros(num_assets),
            objectives: vec![0.0; NUMBER_OF_OPTIMIZATION_OBJECTIVES],
        }
    }

    fn decode(&mut self, instance: &Instance, chromosome: &[f64]) -> &[f64] {
        assert_eq!(
            chromosome.len(),
            self.weights.len(),
            "chromosome has {} keys but the instance has {} assets",
            chromosome.len(),
            self.weights.len()
        );
        normalize_key_into(chromosome, self.weights.as_mut_slice());
        evaluate_into(instance, &self.weights, &mut self.product, &mut self.objectives);
        &self.objectives
    }

    fn decode_individual(&mut self, instance: &Instance, chromosome: &[f64]) -> Individual {
        let objectives = self.decode(instance, chromosome).to_vec();
        Individual::new(objectives, self.weights.as_slice().to_vec())
    }
}

/// Turns random-key chromosomes into evaluated individuals.
///
/// Holds one scratch slot per worker, fixed at construction. A worker only
/// ever touches its own slot, so a batch can be decoded in parallel without
/// locks.
#[derive(Debug, Clone)]
pub struct Decoder {
    instance: Instance,
    slots: Vec<DecodeSlot>,
}

impl Decoder {
    pub fn new(instance: Instance, num_threads: usize) -> Result<Self, EvolutionError> {
        if num_threads == 0 {
            return Err(EvolutionError::BadThreadCount);
        }
        let slots = (0..num_threads)
            .map(|_| DecodeSlot::new(instance.num_assets()))
            .collect();
        Ok(Decoder { instance, slots })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn num_threads(&self) -> usize {
        self.slots.len()
    }

    /// Decodes one chromosome in the slot of `worker_id` (slot 0 when `None`)
    /// and returns its objective vector.
    ///
    /// # Panics
    /// If `worker_id` is out of range or the chromosome length differs from
    /// the number of assets.
    pub fn decode(&mut self, chromosome: &[f64], worker_id: Option<usize>) -> Vec<f64> {
        let slot = &mut self.slots[worker_id.unwrap_or(0)];
        slot.decode(&self.instance, chromosome).to_vec()
    }

    /// Like [`Decoder::decode`], but keeps the normalized weights too.
    pub fn decode_individual(&mut self, chromosome: &[f64], worker_id: Option<usize>) -> Individual {
        let slot = &mut self.slots[worker_id.unwrap_or(0)];
        slot.decode_individual(&self.instance, chromosome)
    }

    /// Decodes a batch on the rayon pool, one contiguous chunk per slot.
    ///
    /// Results are in input order.
    pub fn decode_batch<K>(&mut self, chromosomes: &[K]) -> Vec<Individual>
    where
        K: AsRef<[f64]> + Sync,
    {
        let chunk_size = chromosomes.len().div_ceil(self.slots.len()).max(1);
        let instance = &self.instance;

        self.slots
            .par_iter_mut()
            .zip(chromosomes.par_chunks(chunk_size))
            .map(|(slot, chunk)| {
                chunk
                    .iter()
                    .map(|chromosome| slot.decode_individual(instance, chromosome.as_ref()))
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect()
    }
}
