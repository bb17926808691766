// Sparse ordered map over integer keys, stored as a sorted run of blocks
//
// Each block covers a contiguous key range of at most `block_size` keys and
// holds one slot per key. Keys address a virtual dense array: inserting or
// removing a key range only splits the block at the position and rewrites the
// start key of every later block, never moving values between blocks except
// in the touched one.
//
// Invariants kept by every operation:
//   * blocks are sorted by start and never overlap
//   * every block holds at least one value
//   * no key exceeds `max_key`
//   * `len`, `front` and `back` are exact

use crate::{Index, MAX_INDEX};

pub const DEFAULT_BLOCK_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct Block<V> {
    start: Index,
    slots: Vec<Option<V>>,
    count: usize,
}

impl<V> Block<V> {
    /// One past the last key this block can hold.
    #[inline]
    fn end(&self) -> u64 {
        self.start as u64 + self.slots.len() as u64
    }

    fn first_key(&self) -> Option<Index> {
        self.slots
            .iter()
            .position(Option::is_some)
            .map(|i| self.start + i as Index)
    }

    fn last_key(&self) -> Option<Index> {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map(|i| self.start + i as Index)
    }
}

#[derive(Debug, Clone)]
pub struct BlockIndexMap<V> {
    blocks: Vec<Block<V>>,
    block_size: usize,
    max_key: Index,
    len: usize,
    front: Option<Index>,
    back: Option<Index>,
}

impl<V> Default for BlockIndexMap<V> {
    fn default() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }
}

impl<V> BlockIndexMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(block_size: usize) -> Self {
        BlockIndexMap {
            blocks: Vec::new(),
            block_size: block_size.max(1),
            max_key: MAX_INDEX,
            len: 0,
            front: None,
            back: None,
        }
    }

    /// Lower the largest addressable key. Existing keys above it are dropped.
    pub fn with_max_key(mut self, max_key: Index) -> Self {
        self.max_key = max_key.min(MAX_INDEX);
        if self.back.is_some_and(|b| b > self.max_key) {
            let limit = self.max_key as u64;
            self.truncate_above(limit);
        }
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn front_key(&self) -> Option<Index> {
        self.front
    }

    #[inline]
    pub fn back_key(&self) -> Option<Index> {
        self.back
    }

    #[inline]
    pub fn max_key(&self) -> Index {
        self.max_key
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
        self.front = None;
        self.back = None;
    }

    /// Index of the block containing `key`, if any.
    #[inline]
    fn find(&self, key: Index) -> Option<usize> {
        let idx = self.blocks.partition_point(|b| b.start <= key);
        if idx > 0 && (key as u64) < self.blocks[idx - 1].end() {
            Some(idx - 1)
        } else {
            None
        }
    }

    pub fn contains_key(&self, key: Index) -> bool {
        self.value(key).is_some()
    }

    pub fn value(&self, key: Index) -> Option<&V> {
        let block = &self.blocks[self.find(key)?];
        block.slots[(key - block.start) as usize].as_ref()
    }

    pub fn value_mut(&mut self, key: Index) -> Option<&mut V> {
        let idx = self.find(key)?;
        let block = &mut self.blocks[idx];
        block.slots[(key - block.start) as usize].as_mut()
    }

    /// Store `value` at `key`. Returns false and drops the value when `key`
    /// is beyond `max_key`.
    pub fn set(&mut self, key: Index, value: V) -> bool {
        if key > self.max_key {
            return false;
        }

        let idx = self.blocks.partition_point(|b| b.start <= key);
        if idx > 0 && (key as u64) < self.blocks[idx - 1].end() {
            let block = &mut self.blocks[idx - 1];
            let slot = &mut block.slots[(key - block.start) as usize];
            if slot.is_none() {
                block.count += 1;
                self.len += 1;
            }
            *slot = Some(value);
        } else {
            // New block aligned to the block size, clamped to its neighbours
            let bs = self.block_size as u64;
            let key64 = key as u64;
            let prev_end = if idx > 0 { self.blocks[idx - 1].end() } else { 0 };
            let next_start = self
                .blocks
                .get(idx)
                .map_or(self.max_key as u64 + 1, |b| b.start as u64);
            let aligned = key64 - key64 % bs;
            let start = aligned.max(prev_end);
            let end = (aligned + bs).min(next_start).min(self.max_key as u64 + 1);

            let mut slots = Vec::with_capacity((end - start) as usize);
            slots.resize_with((end - start) as usize, || None);
            slots[(key64 - start) as usize] = Some(value);
            self.blocks.insert(
                idx,
                Block {
                    start: start as Index,
                    slots,
                    count: 1,
                },
            );
            self.len += 1;
        }

        if self.front.map_or(true, |f| key < f) {
            self.front = Some(key);
        }
        if self.back.map_or(true, |b| key > b) {
            self.back = Some(key);
        }
        true
    }

    pub fn remove(&mut self, key: Index) -> Option<V> {
        let idx = self.find(key)?;
        let block = &mut self.blocks[idx];
        let value = block.slots[(key - block.start) as usize].take()?;
        block.count -= 1;
        self.len -= 1;
        if block.count == 0 {
            self.blocks.remove(idx);
        }
        if self.front == Some(key) || self.back == Some(key) {
            self.recompute_bounds();
        }
        Some(value)
    }

    /// Split the block containing `pos` so that a block boundary falls on
    /// `pos`. Returns the index of the first block starting at or after `pos`.
    fn split_at(&mut self, pos: Index) -> usize {
        let i = self.blocks.partition_point(|b| b.start < pos);
        if i == 0 || (pos as u64) >= self.blocks[i - 1].end() {
            return i;
        }

        let block = &mut self.blocks[i - 1];
        let tail = block.slots.split_off((pos - block.start) as usize);
        let tail_count = tail.iter().filter(|s| s.is_some()).count();
        block.count -= tail_count;
        let tail_block = Block {
            start: pos,
            slots: tail,
            count: tail_count,
        };

        if block.count == 0 {
            self.blocks[i - 1] = tail_block;
            i - 1
        } else {
            if tail_count > 0 {
                self.blocks.insert(i, tail_block);
            }
            i
        }
    }

    /// Shift every key >= `pos` up by `count`. Keys pushed past `max_key` are
    /// dropped.
    pub fn insert_keys(&mut self, pos: Index, count: Index) {
        if count == 0 || pos > self.max_key || self.back.map_or(true, |b| b < pos) {
            return;
        }

        let first = self.split_at(pos);
        let shift = count as u64;
        let limit = self.max_key as u64;
        let mut dropped = 0;
        let mut keep = self.blocks.len();

        for (i, block) in self.blocks.iter_mut().enumerate().skip(first) {
            let new_start = block.start as u64 + shift;
            if new_start > limit {
                keep = i;
                break;
            }
            block.start = new_start as Index;
            let room = (limit + 1 - new_start) as usize;
            if block.slots.len() > room {
                let lost = block.slots.drain(room..).filter(Option::is_some).count();
                block.count -= lost;
                dropped += lost;
            }
        }
        for block in self.blocks.drain(keep..) {
            dropped += block.count;
        }
        if dropped > 0 {
            self.blocks.retain(|b| b.count > 0);
            self.len -= dropped;
        }
        self.recompute_bounds();
    }

    /// Remove keys in `[pos, pos + count)` and shift later keys down by the
    /// number of positions removed. `count` is clamped to the key space.
    pub fn remove_keys(&mut self, pos: Index, count: Index) {
        if count == 0 || pos > self.max_key || self.back.map_or(true, |b| b < pos) {
            return;
        }

        let key_space = self.max_key as u64 + 1;
        let count = (count as u64).min(key_space - pos as u64);
        let end = pos as u64 + count;

        let first = self.split_at(pos);
        let last = if end < key_space {
            self.split_at(end as Index)
        } else {
            self.blocks.len()
        };

        let removed: usize = self.blocks.drain(first..last).map(|b| b.count).sum();
        self.len -= removed;

        for block in &mut self.blocks[first..] {
            block.start = (block.start as u64 - count) as Index;
        }

        self.coalesce();
        self.recompute_bounds();
    }

    /// Merge neighbouring blocks that touch and fit in one block together.
    fn coalesce(&mut self) {
        let bs = self.block_size;
        let mut merged: Vec<Block<V>> = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            if block.count == 0 {
                continue;
            }
            if let Some(prev) = merged.last_mut() {
                if prev.end() == block.start as u64 && prev.slots.len() + block.slots.len() <= bs {
                    prev.slots.extend(block.slots);
                    prev.count += block.count;
                    continue;
                }
            }
            merged.push(block);
        }
        self.blocks = merged;
    }

    fn truncate_above(&mut self, limit: u64) {
        let mut dropped = 0;
        for block in &mut self.blocks {
            let room = (limit + 1).saturating_sub(block.start as u64) as usize;
            if block.slots.len() > room {
                let lost = block.slots.drain(room..).filter(Option::is_some).count();
                block.count -= lost;
                dropped += lost;
            }
        }
        self.blocks.retain(|b| b.count > 0);
        self.len -= dropped;
        self.recompute_bounds();
    }

    fn recompute_bounds(&mut self) {
        self.front = self.blocks.first().and_then(Block::first_key);
        self.back = self.blocks.last().and_then(Block::last_key);
    }

    /// Move every entry of `other` into this map with keys shifted by
    /// `offset`. Whole blocks are moved when all shifted keys lie above the
    /// current back key; otherwise entries are set one at a time.
    pub fn append_shifted(&mut self, other: BlockIndexMap<V>, offset: u64) {
        let Some(other_front) = other.front else {
            return;
        };
        let shifted_front = other_front as u64 + offset;
        if self.back.is_some_and(|b| shifted_front <= b as u64) {
            for (key, value) in other.into_entries() {
                let key = key as u64 + offset;
                if key <= self.max_key as u64 {
                    self.set(key as Index, value);
                }
            }
            return;
        }

        let limit = self.max_key as u64;
        if let (Some(back), Some(last)) = (self.back, self.blocks.last_mut()) {
            last.slots.truncate((back - last.start) as usize + 1);
        }

        for mut block in other.blocks {
            let mut start = block.start as u64 + offset;
            if start > limit {
                break;
            }
            // Leading empty slots that would overlap the previous block
            let prev_end = self.blocks.last().map_or(0, Block::end);
            if start < prev_end {
                block.slots.drain(..(prev_end - start) as usize);
                start = prev_end;
            }
            let room = (limit + 1 - start) as usize;
            if block.slots.len() > room {
                let lost = block.slots.drain(room..).filter(Option::is_some).count();
                block.count -= lost;
            }
            if block.count == 0 {
                continue;
            }
            block.start = start as Index;
            self.len += block.count;
            self.blocks.push(block);
        }
        self.recompute_bounds();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &V)> + '_ {
        self.blocks.iter().flat_map(|block| {
            let start = block.start;
            block
                .slots
                .iter()
                .enumerate()
                .filter_map(move |(i, slot)| slot.as_ref().map(|v| (start + i as Index, v)))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut V)> + '_ {
        self.blocks.iter_mut().flat_map(|block| {
            let start = block.start;
            block
                .slots
                .iter_mut()
                .enumerate()
                .filter_map(move |(i, slot)| slot.as_mut().map(|v| (start + i as Index, v)))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = Index> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn into_entries(self) -> impl Iterator<Item = (Index, V)> {
        self.blocks.into_iter().flat_map(|block| {
            let start = block.start;
            block
                .slots
                .into_iter()
                .enumerate()
                .filter_map(move |(i, slot)| slot.map(|v| (start + i as Index, v)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries<V: Clone>(map: &BlockIndexMap<V>) -> Vec<(Index, V)> {
        map.iter().map(|(k, v)| (k, v.clone())).collect()
    }

    /// Checks the cached bounds and length against a full scan.
    fn assert_consistent<V>(map: &BlockIndexMap<V>) {
        let keys: Vec<Index> = map.keys().collect();
        assert_eq!(map.len(), keys.len());
        assert_eq!(map.front_key(), keys.first().copied());
        assert_eq!(map.back_key(), keys.last().copied());
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        for pair in map.blocks.windows(2) {
            assert!(pair[0].end() <= pair[1].start as u64);
        }
        for block in &map.blocks {
            assert!(block.count > 0);
            assert!(block.slots.len() <= map.block_size());
        }
    }

    #[test]
    fn test_set_far_apart_spans_blocks() {
        let mut map = BlockIndexMap::with_block_size(16);
        let n = 1000;
        map.set(0, "a");
        map.set(n, "b");
        assert_eq!(map.back_key(), Some(n));
        assert_eq!(map.front_key(), Some(0));
        assert_eq!(map.value(n), Some(&"b"));
        assert_eq!(map.value(n - 1), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.block_count(), 2);
        assert_consistent(&map);
    }

    #[test]
    fn test_overwrite_keeps_len() {
        let mut map = BlockIndexMap::new();
        map.set(5, 1);
        map.set(5, 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.value(5), Some(&2));
        *map.value_mut(5).unwrap() = 3;
        assert_eq!(map.value(5), Some(&3));
    }

    #[test]
    fn test_set_beyond_max_key_is_dropped() {
        let mut map = BlockIndexMap::new().with_max_key(10);
        assert!(map.set(10, 'x'));
        assert!(!map.set(11, 'y'));
        assert_eq!(map.len(), 1);
        assert_eq!(map.back_key(), Some(10));
    }

    #[test]
    fn test_set_at_absolute_max() {
        let mut map = BlockIndexMap::new();
        assert!(map.set(MAX_INDEX, 1));
        assert!(!map.set(u32::MAX, 2));
        assert_eq!(map.back_key(), Some(MAX_INDEX));
        assert_consistent(&map);
    }

    #[test]
    fn test_new_block_clamps_to_neighbours() {
        let mut map = BlockIndexMap::with_block_size(8);
        map.set(10, 'a');
        // Block for 10 covers 8..16; a key in 0..8 gets its own block
        map.set(3, 'b');
        map.set(7, 'c');
        assert_eq!(map.block_count(), 2);
        assert_eq!(entries(&map), vec![(3, 'b'), (7, 'c'), (10, 'a')]);
        assert_consistent(&map);
    }

    #[test]
    fn test_remove_updates_bounds() {
        let mut map = BlockIndexMap::with_block_size(4);
        for k in [1, 5, 9] {
            map.set(k, k * 10);
        }
        assert_eq!(map.remove(1), Some(10));
        assert_eq!(map.front_key(), Some(5));
        assert_eq!(map.remove(9), Some(90));
        assert_eq!(map.back_key(), Some(5));
        assert_eq!(map.remove(9), None);
        assert_eq!(map.block_count(), 1);
        assert_eq!(map.remove(5), Some(50));
        assert!(map.is_empty());
        assert_eq!(map.front_key(), None);
        assert_consistent(&map);
    }

    #[test]
    fn test_insert_keys_shifts_later_keys() {
        let mut map = BlockIndexMap::with_block_size(4);
        for k in 0..10 {
            map.set(k, k);
        }
        map.insert_keys(5, 3);
        let expected: Vec<(Index, Index)> = (0..5)
            .map(|k| (k, k))
            .chain((5..10).map(|k| (k + 3, k)))
            .collect();
        assert_eq!(entries(&map), expected);
        assert_eq!(map.value(5), None);
        assert_consistent(&map);
    }

    #[test]
    fn test_insert_then_remove_restores() {
        let mut map = BlockIndexMap::with_block_size(8);
        for k in [0, 3, 7, 8, 20, 63, 64, 200] {
            map.set(k, format!("v{k}"));
        }
        let before = entries(&map);
        for (pos, count) in [(0, 1), (5, 10), (7, 100), (64, 3), (500, 4)] {
            map.insert_keys(pos, count);
            assert_consistent(&map);
            map.remove_keys(pos, count);
            assert_consistent(&map);
            assert_eq!(entries(&map), before, "pos={pos} count={count}");
        }
    }

    #[test]
    fn test_remove_keys_drops_range() {
        let mut map = BlockIndexMap::with_block_size(4);
        for k in 0..12 {
            map.set(k, k);
        }
        map.remove_keys(2, 5);
        let expected: Vec<(Index, Index)> =
            [0, 1].into_iter().chain(7..12).enumerate().map(|(i, v)| (i as Index, v)).collect();
        assert_eq!(entries(&map), expected);
        assert_eq!(map.back_key(), Some(6));
        assert_consistent(&map);
    }

    #[test]
    fn test_remove_keys_clamps_count() {
        let mut map = BlockIndexMap::new().with_max_key(100);
        map.set(1, 'a');
        map.set(50, 'b');
        map.set(100, 'c');
        map.remove_keys(40, Index::MAX);
        assert_eq!(entries(&map), vec![(1, 'a')]);
        assert_consistent(&map);
    }

    #[test]
    fn test_remove_keys_merges_blocks() {
        let mut map = BlockIndexMap::with_block_size(8);
        map.set(0, 0);
        map.set(12, 12);
        assert_eq!(map.block_count(), 2);
        // Leaves 0..2 and 10..16 which fit into one block once shifted
        map.remove_keys(2, 8);
        assert_eq!(entries(&map), vec![(0, 0), (4, 12)]);
        assert_eq!(map.block_count(), 1);
        assert_consistent(&map);
    }

    #[test]
    fn test_insert_keys_saturates_at_max() {
        let mut map = BlockIndexMap::new().with_max_key(20);
        map.set(5, 'a');
        map.set(15, 'b');
        map.set(19, 'c');
        map.insert_keys(10, 3);
        // 15 -> 18 survives, 19 -> 22 is dropped
        assert_eq!(entries(&map), vec![(5, 'a'), (18, 'b')]);
        assert_consistent(&map);

        map.insert_keys(0, Index::MAX);
        assert!(map.is_empty());
        assert_consistent(&map);
    }

    #[test]
    fn test_insert_keys_past_back_is_noop() {
        let mut map = BlockIndexMap::new();
        map.set(3, 1);
        map.insert_keys(4, 10);
        assert_eq!(entries(&map), vec![(3, 1)]);
    }

    #[test]
    fn test_append_shifted_moves_blocks() {
        let mut left = BlockIndexMap::with_block_size(8);
        left.set(0, 'a');
        left.set(2, 'b');
        let mut right = BlockIndexMap::with_block_size(8);
        right.set(0, 'c');
        right.set(9, 'd');
        left.append_shifted(right, 3);
        assert_eq!(entries(&left), vec![(0, 'a'), (2, 'b'), (3, 'c'), (12, 'd')]);
        assert_consistent(&left);
        assert_eq!(left.value(3), Some(&'c'));
        assert_eq!(left.value(12), Some(&'d'));
    }

    #[test]
    fn test_append_shifted_overlap_falls_back() {
        let mut left = BlockIndexMap::new();
        left.set(5, 1);
        let mut right = BlockIndexMap::new();
        right.set(0, 2);
        right.set(10, 3);
        left.append_shifted(right, 2);
        assert_eq!(entries(&left), vec![(2, 2), (5, 1), (12, 3)]);
        assert_consistent(&left);
    }

    #[test]
    fn test_iter_mut_and_into_entries() {
        let mut map = BlockIndexMap::with_block_size(2);
        for k in [1, 4, 9] {
            map.set(k, k);
        }
        for (_, v) in map.iter_mut() {
            *v *= 2;
        }
        let all: Vec<_> = map.into_entries().collect();
        assert_eq!(all, vec![(1, 2), (4, 8), (9, 18)]);
    }
}
