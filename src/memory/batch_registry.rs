use {
    crate::memory::{AllocatorError, Batch, TilingClass},
    ash::vk,
};

/// Every live batch, grouped by the memory type it was allocated from.
///
/// Batches are found by their device memory handle rather than by index, so
/// removing a batch never invalidates the handles held by other resources.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches_by_type: Vec<Vec<Batch>>,
}

impl BatchRegistry {
    pub fn new(memory_type_count: usize) -> Self {
        Self {
            batches_by_type: (0..memory_type_count).map(|_| vec![]).collect(),
        }
    }

    /// All batches for a memory type, in creation order.
    pub fn batches(&self, memory_type_index: u32) -> &[Batch] {
        self.batches_by_type
            .get(memory_type_index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Batches for a memory type which hold the given tiling class.
    pub fn batches_for_tiling_mut(
        &mut self,
        memory_type_index: u32,
        tiling_class: TilingClass,
    ) -> impl Iterator<Item = &mut Batch> {
        self.batches_by_type
            .get_mut(memory_type_index as usize)
            .into_iter()
            .flat_map(|batches| batches.iter_mut())
            .filter(move |batch| batch.tiling_class() == tiling_class)
    }

    pub fn push(&mut self, batch: Batch) {
        let index = batch.memory_type_index() as usize;
        if self.batches_by_type.len() <= index {
            self.batches_by_type.resize_with(index + 1, Vec::new);
        }
        self.batches_by_type[index].push(batch);
    }

    pub fn find_mut(
        &mut self,
        memory_type_index: u32,
        memory: vk::DeviceMemory,
    ) -> Result<&mut Batch, AllocatorError> {
        self.batches_by_type
            .get_mut(memory_type_index as usize)
            .and_then(|batches| {
                batches.iter_mut().find(|batch| batch.memory() == memory)
            })
            .ok_or(AllocatorError::UnknownBatch(memory, memory_type_index))
    }

    /// Take the batch out of the registry. Only empty batches should be
    /// removed, the caller frees the device memory.
    pub fn remove(
        &mut self,
        memory_type_index: u32,
        memory: vk::DeviceMemory,
    ) -> Option<Batch> {
        let batches = self.batches_by_type.get_mut(memory_type_index as usize)?;
        let index = batches.iter().position(|batch| batch.memory() == memory)?;
        Some(batches.remove(index))
    }

    /// Remove every batch, leaving the registry empty.
    pub fn drain(&mut self) -> impl Iterator<Item = Batch> + '_ {
        self.batches_by_type.iter_mut().flat_map(|batches| batches.drain(..))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches_by_type.iter().flatten()
    }

    pub fn batch_count(&self, memory_type_index: u32) -> usize {
        self.batches(memory_type_index).len()
    }

    pub fn total_batch_count(&self) -> usize {
        self.batches_by_type.iter().map(Vec::len).sum()
    }
}
