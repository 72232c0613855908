//! Memory-bounded store for materialised chunks.

use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FieldError, Result};

/// Chunk key: (time index, z block, y block, x block).
pub type ChunkKey = [usize; 4];

/// Decoded chunk values, stored at the field's cast width.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ChunkData {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> f64 {
        match self {
            Self::F32(v) => v[i] as f64,
            Self::F64(v) => v[i],
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::F32(v) => v.len() * std::mem::size_of::<f32>(),
            Self::F64(v) => v.len() * std::mem::size_of::<f64>(),
        }
    }
}

/// A resident chunk and its extent in source index space.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: ChunkData,
    pub shape: [usize; 4],
    /// Set when a sample read from this chunk since the last window change.
    pub touched: bool,
}

impl Chunk {
    /// Value at a position relative to the chunk origin.
    pub fn value(&self, local: [usize; 4]) -> f64 {
        let [_, nz, ny, nx] = self.shape;
        let offset = ((local[0] * nz + local[1]) * ny + local[2]) * nx + local[3];
        self.data.get(offset)
    }
}

/// Residency statistics for one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArenaStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl ArenaStats {
    /// Fraction of lookups served from memory (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU-ordered chunk store with a hard byte budget.
#[derive(Debug)]
pub struct ChunkArena {
    chunks: LruCache<ChunkKey, Chunk>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkArena {
    /// Create an arena holding at most `memory_limit` bytes.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            chunks: LruCache::unbounded(),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a chunk, refreshing its LRU position.
    pub fn get_mut(&mut self, key: &ChunkKey) -> Option<&mut Chunk> {
        match self.chunks.get_mut(key) {
            Some(chunk) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(chunk)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.chunks.contains(key)
    }

    /// Insert a chunk, evicting least recently used chunks to stay within
    /// the budget.
    ///
    /// A single chunk larger than the whole budget is refused.
    pub fn insert(&mut self, key: ChunkKey, chunk: Chunk) -> Result<()> {
        let size = chunk.data.bytes();
        if size > self.memory_limit {
            return Err(FieldError::ResourceExhaustion {
                requested_bytes: size,
                budget_bytes: self.memory_limit,
            });
        }

        while self.current_memory + size > self.memory_limit && !self.chunks.is_empty() {
            if let Some((_, evicted)) = self.chunks.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(evicted.data.bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(old) = self.chunks.put(key, chunk) {
            self.current_memory = self.current_memory.saturating_sub(old.data.bytes());
        }
        self.current_memory += size;
        Ok(())
    }

    /// Drop every chunk for which `keep` returns false.
    ///
    /// Returns the number of chunks dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&ChunkKey, &Chunk) -> bool) -> usize {
        let doomed: Vec<ChunkKey> = self
            .chunks
            .iter()
            .filter(|(key, chunk)| !keep(key, chunk))
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            if let Some(chunk) = self.chunks.pop(key) {
                self.current_memory = self.current_memory.saturating_sub(chunk.data.bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        doomed.len()
    }

    /// Reset every touched flag.
    pub fn clear_touched(&mut self) {
        for (_, chunk) in self.chunks.iter_mut() {
            chunk.touched = false;
        }
    }

    /// Time indices that currently have at least one resident chunk.
    pub fn resident_times(&self) -> Vec<usize> {
        let mut times: Vec<usize> = self.chunks.iter().map(|(key, _)| key[0]).collect();
        times.sort_unstable();
        times.dedup();
        times
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.chunks.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: usize, value: f32) -> Chunk {
        Chunk {
            data: ChunkData::F32(vec![value; n]),
            shape: [1, 1, 1, n],
            touched: false,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut arena = ChunkArena::new(1024);
        let key = [0, 0, 0, 0];

        assert!(arena.get_mut(&key).is_none());
        arena.insert(key, chunk(4, 1.5)).unwrap();
        let found = arena.get_mut(&key).unwrap();
        assert_eq!(found.value([0, 0, 0, 3]), 1.5);
        assert_eq!(arena.memory_usage(), 16);
    }

    #[test]
    fn test_lru_eviction_respects_budget() {
        // 64 bytes = four chunks of four f32s
        let mut arena = ChunkArena::new(64);
        for i in 0..10 {
            arena.insert([i, 0, 0, 0], chunk(4, i as f32)).unwrap();
        }

        assert!(arena.memory_usage() <= 64);
        assert!(!arena.contains(&[0, 0, 0, 0]));
        assert!(arena.contains(&[9, 0, 0, 0]));
        assert_eq!(arena.stats().evictions, 6);
    }

    #[test]
    fn test_oversized_chunk_is_refused() {
        let mut arena = ChunkArena::new(8);
        let err = arena.insert([0, 0, 0, 0], chunk(4, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            FieldError::ResourceExhaustion {
                requested_bytes: 16,
                budget_bytes: 8
            }
        ));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_retain_by_time() {
        let mut arena = ChunkArena::new(1024);
        for t in 0..4 {
            arena.insert([t, 0, 0, 0], chunk(2, 0.0)).unwrap();
        }
        let dropped = arena.retain(|key, _| key[0] >= 2);
        assert_eq!(dropped, 2);
        assert_eq!(arena.resident_times(), vec![2, 3]);
        assert_eq!(arena.memory_usage(), 16);
    }

    #[test]
    fn test_stats_hit_rate() {
        let mut arena = ChunkArena::new(1024);
        arena.insert([0, 0, 0, 0], chunk(1, 0.0)).unwrap();
        arena.get_mut(&[0, 0, 0, 0]);
        arena.get_mut(&[1, 0, 0, 0]);

        let stats = arena.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
