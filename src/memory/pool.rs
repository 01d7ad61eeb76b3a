use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A zero-filled `f32` buffer on loan from a [`ScratchPool`].
#[derive(Debug)]
pub struct ScratchBuffer {
    pub data: Vec<f32>,
}

impl ScratchBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::ops::Deref for ScratchBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl std::ops::DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Pool of reusable scratch buffers keyed by length.
///
/// Attention allocates the same handful of per-head score and context buffers on
/// every call; routing them through the pool keeps steady-state classification free
/// of small heap allocations.
#[derive(Clone, Default)]
pub struct ScratchPool {
    buffers: Arc<Mutex<HashMap<usize, Vec<Vec<f32>>>>>,
    /// Upper bound on idle buffers kept per length
    max_per_size: usize,
}

impl std::fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (total, sizes) = self.get_pool_statistics();
        f.debug_struct("ScratchPool")
            .field("idle_buffers", &total)
            .field("distinct_sizes", &sizes)
            .field("max_per_size", &self.max_per_size)
            .finish()
    }
}

impl ScratchPool {
    pub fn new(max_per_size: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            max_per_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, Vec<Vec<f32>>>> {
        // Pool contents are valid even after a panic elsewhere.
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a zeroed buffer from the pool or allocate a new one if none is available
    pub fn get_or_create_buffer(&self, len: usize) -> ScratchBuffer {
        {
            let mut pool = self.lock();
            if let Some(buffers) = pool.get_mut(&len)
                && let Some(mut data) = buffers.pop()
            {
                data.fill(0.0);
                return ScratchBuffer { data };
            }
        }

        ScratchBuffer { data: vec![0.0; len] }
    }

    /// Return a buffer to the pool for reuse
    pub fn return_buffer_to_pool(&self, buffer: ScratchBuffer) {
        let len = buffer.data.len();
        let mut pool = self.lock();
        let slot = pool.entry(len).or_default();
        if slot.len() < self.max_per_size {
            slot.push(buffer.data);
        }
    }

    /// Drop all idle buffers
    pub fn clear_buffer_pool(&self) {
        let mut pool = self.lock();
        let released: usize = pool.values().map(|v| v.len()).sum();
        pool.clear();
        debug!("Scratch pool cleared, released {} buffers", released);
    }

    /// Get statistics about buffer pool usage: (idle buffers, distinct lengths)
    pub fn get_pool_statistics(&self) -> (usize, usize) {
        let pool = self.lock();
        let total_buffers: usize = pool.values().map(|v| v.len()).sum();
        let pool_types = pool.values().filter(|v| !v.is_empty()).count();
        (total_buffers, pool_types)
    }
}
