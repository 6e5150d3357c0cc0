//! Hopscotch hash table used as the build-side index for the partitioned hash
//! join's per-partition probe phase.
//!
//! Open addressing with a bounded neighbourhood: every key's home bucket is
//! `ran_hash(payload) % capacity`, and a match is guaranteed to live within
//! `neighbourhood_size` buckets of its home (tracked by that home bucket's
//! `bitmap`). Insertion displaces occupants toward their home neighbourhood
//! instead of growing a probe chain without bound, which keeps lookups to a
//! handful of cache lines even under load.

/// Row ids matching a probed payload. `None` and "present but empty" are not
/// distinguished — every populated chain has at least one id.
pub type RowIds = Vec<u32>;

pub use crate::storage::relation::Tuple;

#[derive(Debug, Clone, Default)]
struct Bucket {
    /// Home bucket index of the tuple currently stored here (not its key).
    key: u32,
    payload: u32,
    bitmap: u64,
    chain: Option<RowIds>,
}

impl Bucket {
    fn num_payloads(&self) -> usize {
        self.chain.as_ref().map_or(0, |ids| ids.len())
    }
}

/// 64-bit integer hash used to pick a tuple's home bucket. Exact constants and
/// shift sequence mirror the reference mixer so hash distributions (and the
/// neighbourhood-overflow behaviour they drive) are reproducible.
pub fn ran_hash(value: u64) -> u64 {
    let mut hash = value;
    hash = hash.wrapping_mul(3_935_559_000_370_003_845);
    hash = hash.wrapping_add(2_691_343_689_449_507_681);
    hash ^= hash >> 21;
    hash ^= hash << 37;
    hash ^= hash >> 4;
    hash = hash.wrapping_mul(4_768_777_513_237_032_717);
    hash ^= hash << 20;
    hash ^= hash >> 41;
    hash ^= hash << 5;
    hash
}

fn bucket_distance(smaller_index: u32, larger_index: u32, total_buckets: u32) -> u32 {
    let larger = if smaller_index > larger_index {
        larger_index + total_buckets
    } else {
        larger_index
    };
    larger - smaller_index
}

/// Offset of the first unset bit in `bitmap`, scanning from the neighbourhood's
/// far edge inward. Returns `neighbourhood_size` if the neighbourhood is full.
fn empty_space(bitmap: u64, neighbourhood_size: u32) -> u32 {
    if bitmap == (1u64 << neighbourhood_size) - 1 {
        return neighbourhood_size;
    }

    for j in (1..=neighbourhood_size).rev() {
        if (bitmap >> (j - 1)) & 1 == 0 {
            return neighbourhood_size - j;
        }
    }

    unreachable!("bitmap reported full by the fast check but no set bit found")
}

pub struct HashTable {
    buckets: Vec<Bucket>,
    size: u32,
    capacity: u32,
    neighbourhood_size: u32,
}

impl HashTable {
    pub fn new(capacity: u32, neighbourhood_size: u32) -> Self {
        Self {
            buckets: (0..capacity).map(|_| Bucket::default()).collect(),
            size: 0,
            capacity,
            neighbourhood_size,
        }
    }

    pub fn len(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Inserts `tuple`, keyed by `tuple.payload`. Returns the bucket index the
    /// row id was ultimately stored at.
    pub fn insert(&mut self, tuple: &Tuple) -> u32 {
        let key = (ran_hash(tuple.payload as u64) % self.capacity as u64) as u32;
        let occupied = self.buckets[key as usize].num_payloads();

        if occupied == 0 {
            self.buckets[key as usize]
                .chain
                .get_or_insert_with(Vec::new)
                .push(tuple.key);
            self.size += 1;
            self.buckets[key as usize].key = key;
            self.buckets[key as usize].payload = tuple.payload;
            self.buckets[key as usize].bitmap ^= 1u64 << (self.neighbourhood_size - 1);
            return key;
        }

        if self.buckets[key as usize].bitmap == (1u64 << self.neighbourhood_size) - 1 {
            self.merge_or_rehash(key);
            return self.insert(tuple);
        }

        let empty_bucket_index = self.linear_probe(key);

        if empty_bucket_index == self.capacity + 1 {
            self.rehash();
            return self.insert(tuple);
        }

        let distance = bucket_distance(key, empty_bucket_index, self.capacity);

        if distance < self.neighbourhood_size {
            self.buckets[empty_bucket_index as usize]
                .chain
                .get_or_insert_with(Vec::new)
                .push(tuple.key);
            self.size += 1;
            self.buckets[empty_bucket_index as usize].key = key;
            self.buckets[empty_bucket_index as usize].payload = tuple.payload;
            self.buckets[key as usize].bitmap ^= 1u64 << (self.neighbourhood_size - distance - 1);
            return empty_bucket_index;
        }

        self.swap(empty_bucket_index);
        self.insert(tuple)
    }

    /// Returns every row id whose tuple matched `value`, or `None` if none did.
    pub fn search(&self, value: u32) -> Option<RowIds> {
        let mut matches: Option<RowIds> = None;
        let initial_index = (ran_hash(value as u64) % self.capacity as u64) as u32;
        let limit = initial_index + self.neighbourhood_size.min(self.capacity);

        for i in initial_index..limit {
            let bucket = &self.buckets[(i % self.capacity) as usize];
            if bucket.payload == value {
                if let Some(ids) = &bucket.chain {
                    matches.get_or_insert_with(Vec::new).extend_from_slice(ids);
                }
            }
        }

        matches
    }

    /// Walks forward from `start_index` looking for an empty bucket, hopping
    /// over occupied neighbourhoods rather than scanning one slot at a time.
    /// Returns `capacity + 1` as a sentinel if the walk wraps the whole table.
    fn linear_probe(&self, start_index: u32) -> u32 {
        let mut curr_index = start_index;
        let mut num_hops: u32 = 0;

        loop {
            if self.buckets[curr_index as usize].num_payloads() == 0 {
                return curr_index;
            }

            let gap = empty_space(self.buckets[curr_index as usize].bitmap, self.neighbourhood_size);
            let step = if gap != 0 { gap } else { 1 };
            let new_index = (curr_index + step) % self.capacity;

            num_hops += bucket_distance(curr_index, new_index, self.capacity);
            if num_hops >= self.capacity - 1 {
                return self.capacity + 1;
            }

            curr_index = new_index;
        }
    }

    /// Displaces the occupant of the nearest bucket whose home neighbourhood
    /// reaches `empty_slot` into that slot, freeing a bucket closer to the
    /// target neighbourhood. Rehashes instead if no such occupant exists.
    fn swap(&mut self, empty_slot: u32) {
        let mut examine_slot =
            (bucket_distance(self.neighbourhood_size, empty_slot, self.capacity) + 1) % self.capacity;
        let mut swapped = false;

        while examine_slot != empty_slot {
            let occupant_home = self.buckets[examine_slot as usize].key;
            let distance = bucket_distance(occupant_home, empty_slot, self.capacity);

            if distance < self.neighbourhood_size {
                let home = self.buckets[examine_slot as usize].key;
                let payload = self.buckets[examine_slot as usize].payload;
                let chain = self.buckets[examine_slot as usize].chain.take();

                self.buckets[empty_slot as usize].key = home;
                self.buckets[empty_slot as usize].payload = payload;
                self.buckets[empty_slot as usize].chain = chain;

                let relative_to_old = bucket_distance(home, examine_slot, self.capacity) + 1;
                self.buckets[home as usize].bitmap ^= 1u64 << (self.neighbourhood_size - relative_to_old);

                let relative_to_new = distance + 1;
                self.buckets[home as usize].bitmap ^= 1u64 << (self.neighbourhood_size - relative_to_new);

                self.buckets[examine_slot as usize].key = 0;
                self.buckets[examine_slot as usize].chain = None;

                swapped = true;
                break;
            }

            examine_slot = (examine_slot + 1) % self.capacity;
        }

        if !swapped {
            self.rehash();
        }
    }

    /// Looks for a bucket in `key`'s neighbourhood holding the same payload as
    /// some other bucket in that neighbourhood and merges their row ids into
    /// one chain. If the neighbourhood is full of distinct payloads (no
    /// duplicate to merge), grows the table instead.
    fn merge_or_rehash(&mut self, key: u32) {
        let mut found_duplicate = false;

        for i in 0..self.neighbourhood_size - 1 {
            let bucket_i = ((key + i) % self.capacity) as usize;
            if self.buckets[bucket_i].num_payloads() == 0 {
                continue;
            }

            for j in (i + 1)..self.neighbourhood_size {
                let bucket_j = ((key + j) % self.capacity) as usize;
                if self.buckets[bucket_j].num_payloads() == 0 {
                    continue;
                }
                if self.buckets[bucket_i].payload != self.buckets[bucket_j].payload {
                    continue;
                }

                found_duplicate = true;
                let moved = self.buckets[bucket_j].chain.take().unwrap();
                self.buckets[bucket_i].chain.get_or_insert_with(Vec::new).extend(moved);

                let home = self.buckets[bucket_j].key;
                self.buckets[home as usize].bitmap ^= 1u64 << (self.neighbourhood_size - j - 1);
            }
        }

        if !found_duplicate {
            self.rehash();
        }
    }

    /// Doubles capacity and reinserts every stored row id into the fresh
    /// table. The only way a full neighbourhood with no mergeable duplicate
    /// is resolved.
    fn rehash(&mut self) {
        let old_buckets = std::mem::take(&mut self.buckets);
        self.size = 0;
        self.capacity *= 2;
        self.buckets = (0..self.capacity).map(|_| Bucket::default()).collect();

        for bucket in old_buckets {
            if let Some(ids) = bucket.chain {
                for id in ids {
                    self.insert(&Tuple {
                        key: id,
                        payload: bucket.payload,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ran_hash_matches_reference_mix_points() {
        assert_eq!(ran_hash(4) % 16, 11);
        assert_eq!(ran_hash(0) % 16, 3);
        assert_eq!(ran_hash(1028) % 16, 15);
        assert_eq!(ran_hash(36) % 8, 4);
        assert_eq!(ran_hash(552) % 2, 1);
    }

    #[test]
    fn insert_then_search_round_trip() {
        let mut table = HashTable::new(16, 4);
        for row in 0..10u32 {
            table.insert(&Tuple {
                key: row,
                payload: row,
            });
        }

        for row in 0..10u32 {
            let found = table.search(row).expect("payload inserted above");
            assert!(found.contains(&row));
        }

        assert_eq!(table.len(), 10);
    }

    #[test]
    fn search_miss_returns_none() {
        let mut table = HashTable::new(16, 4);
        table.insert(&Tuple { key: 0, payload: 7 });
        assert!(table.search(999).is_none());
    }

    #[test]
    fn duplicate_payloads_share_a_chain() {
        let mut table = HashTable::new(16, 4);
        table.insert(&Tuple { key: 1, payload: 5 });
        table.insert(&Tuple { key: 2, payload: 5 });
        table.insert(&Tuple { key: 3, payload: 5 });

        let found = table.search(5).unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.contains(&1) && found.contains(&2) && found.contains(&3));
    }

    #[test]
    fn neighbourhood_overflow_triggers_growth_not_data_loss() {
        let mut table = HashTable::new(8, 4);
        for row in 0..50u32 {
            table.insert(&Tuple {
                key: row,
                payload: row,
            });
        }

        assert!(table.capacity() >= 8);
        for row in 0..50u32 {
            let found = table.search(row).expect("every distinct payload must survive growth");
            assert_eq!(found, vec![row]);
        }
    }
}
