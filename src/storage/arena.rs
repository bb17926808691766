// Chunked byte arena for owned cell contents
//
// Bytes live in fixed-capacity chunks that are never reallocated, so a slot
// stays valid for the lifetime of the arena. Overwrites reuse the slot when
// the new content fits its capacity; otherwise the caller allocates a fresh
// slot and the old one is abandoned. Abandoned bytes are only released by
// clearing the arena or by copying the live slots into a new one.

pub const DEFAULT_ARENA_BLOCK_SIZE: usize = 1024 * 1024;

/// Location of one owned cell inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSlot {
    pub(crate) chunk: u32,
    offset: u32,
    len: u32,
    cap: u32,
}

impl ArenaSlot {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap as usize
    }
}

#[derive(Debug, Clone)]
pub struct Arena {
    chunks: Vec<Vec<u8>>,
    block_size: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new(DEFAULT_ARENA_BLOCK_SIZE)
    }
}

impl Arena {
    pub fn new(block_size: usize) -> Self {
        Arena {
            chunks: Vec::new(),
            block_size: block_size.clamp(1, u32::MAX as usize),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes handed out so far, abandoned slots included.
    pub fn allocated_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Copy `bytes` into the arena. Returns `None` when they exceed the block size.
    pub fn alloc(&mut self, bytes: &[u8]) -> Option<ArenaSlot> {
        if bytes.len() > self.block_size {
            return None;
        }
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| self.block_size - chunk.len() < bytes.len());
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.block_size));
        }

        let chunk_id = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_id];
        let offset = chunk.len();
        chunk.extend_from_slice(bytes);
        Some(ArenaSlot {
            chunk: chunk_id as u32,
            offset: offset as u32,
            len: bytes.len() as u32,
            cap: bytes.len() as u32,
        })
    }

    /// Write `bytes` into an existing slot if they fit its capacity.
    pub fn overwrite(&mut self, slot: &mut ArenaSlot, bytes: &[u8]) -> bool {
        if bytes.len() > slot.capacity() {
            return false;
        }
        let Some(chunk) = self.chunks.get_mut(slot.chunk as usize) else {
            return false;
        };
        let start = slot.offset as usize;
        chunk[start..start + bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len() as u32;
        true
    }

    #[inline]
    pub fn get(&self, slot: &ArenaSlot) -> &[u8] {
        let start = slot.offset as usize;
        self.chunks
            .get(slot.chunk as usize)
            .map_or(&[][..], |chunk| &chunk[start..start + slot.len()])
    }

    /// Move all chunks of `other` behind ours. Returns the chunk id offset to
    /// add to every slot that pointed into `other`.
    pub fn append(&mut self, other: Arena) -> u32 {
        let base = self.chunks.len() as u32;
        self.chunks.extend(other.chunks);
        base
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_get() {
        let mut arena = Arena::new(16);
        let a = arena.alloc(b"hello").unwrap();
        let b = arena.alloc(b"world!").unwrap();
        assert_eq!(arena.get(&a), b"hello");
        assert_eq!(arena.get(&b), b"world!");
        assert_eq!(arena.chunk_count(), 1);
    }

    #[test]
    fn test_new_chunk_when_full() {
        let mut arena = Arena::new(8);
        let a = arena.alloc(b"12345").unwrap();
        let b = arena.alloc(b"6789").unwrap();
        assert_eq!(arena.chunk_count(), 2);
        assert_eq!(arena.get(&a), b"12345");
        assert_eq!(arena.get(&b), b"6789");
    }

    #[test]
    fn test_oversized_refused() {
        let mut arena = Arena::new(4);
        assert!(arena.alloc(b"12345").is_none());
        assert!(arena.alloc(b"1234").is_some());
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut arena = Arena::new(32);
        let mut slot = arena.alloc(b"abcdef").unwrap();
        assert!(arena.overwrite(&mut slot, b"xyz"));
        assert_eq!(arena.get(&slot), b"xyz");
        assert_eq!(slot.capacity(), 6);
        // Shrunk content still has the original capacity
        assert!(arena.overwrite(&mut slot, b"123456"));
        assert!(!arena.overwrite(&mut slot, b"1234567"));
        assert_eq!(arena.get(&slot), b"123456");
        assert_eq!(arena.allocated_bytes(), 6);
    }

    #[test]
    fn test_append_rebases_chunks() {
        let mut left = Arena::new(8);
        left.alloc(b"left").unwrap();
        let mut right = Arena::new(8);
        let mut slot = right.alloc(b"right").unwrap();
        let base = left.append(right);
        assert_eq!(base, 1);
        slot.chunk += base;
        assert_eq!(left.get(&slot), b"right");
    }

    #[test]
    fn test_empty_slot() {
        let mut arena = Arena::new(8);
        let slot = arena.alloc(b"").unwrap();
        assert!(slot.is_empty());
        assert_eq!(arena.get(&slot), b"");
    }
}
