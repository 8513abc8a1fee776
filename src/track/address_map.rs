use std::collections::BTreeMap;

use super::resources::Buffer;
use crate::utils::Handle;

/// Interval map from device-visible address ranges to the buffers whose
/// memory overlaps them.
///
/// Intervals are identified by the range first inserted for them: a later
/// insert whose range overlaps an existing interval joins that interval's
/// bucket rather than creating a duplicate; a disjoint insert fills in a new
/// interval. Removing the last occupant shrinks the map by dropping the
/// interval.
#[derive(Default)]
pub struct AddressMap {
    ranges: BTreeMap<u64, AddressRange>,
}

struct AddressRange {
    end: u64,
    buffers: Vec<Handle<Buffer>>,
}

impl AddressMap {
    /// Insert `[start, end)` for `buffer`. Returns the key of the interval
    /// the buffer landed in; the caller records it for later removal.
    pub fn insert(&mut self, start: u64, end: u64, buffer: Handle<Buffer>) -> u64 {
        if start >= end {
            return start;
        }
        if let Some((key, range)) = self.overlapping_mut(start, end) {
            if !range.buffers.contains(&buffer) {
                range.buffers.push(buffer);
            }
            return key;
        }
        self.ranges.insert(
            start,
            AddressRange {
                end,
                buffers: vec![buffer],
            },
        );
        start
    }

    /// Excise `buffer` from the interval keyed by `key`; the interval goes
    /// away with its last occupant.
    pub fn remove(&mut self, key: u64, buffer: Handle<Buffer>) {
        let Some(range) = self.ranges.get_mut(&key) else {
            return;
        };
        range.buffers.retain(|b| *b != buffer);
        if range.buffers.is_empty() {
            self.ranges.remove(&key);
        }
    }

    /// Every buffer whose interval contains `address`.
    pub fn resolve(&self, address: u64) -> &[Handle<Buffer>] {
        match self.ranges.range(..=address).next_back() {
            Some((_, range)) if address < range.end => &range.buffers,
            _ => &[],
        }
    }

    pub fn interval_count(&self) -> usize {
        self.ranges.len()
    }

    fn overlapping_mut(&mut self, start: u64, end: u64) -> Option<(u64, &mut AddressRange)> {
        // The only candidates are the interval at or below `start` and the
        // first one above it.
        let below = self
            .ranges
            .range(..=start)
            .next_back()
            .map(|(k, r)| (*k, r.end));
        if let Some((key, range_end)) = below {
            if start < range_end {
                return self.ranges.get_mut(&key).map(|r| (key, r));
            }
        }
        let above = self
            .ranges
            .range(start..)
            .next()
            .map(|(k, _)| *k)
            .filter(|k| *k < end);
        if let Some(key) = above {
            return self.ranges.get_mut(&key).map(|r| (key, r));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(raw: u64) -> Handle<Buffer> {
        Handle::new(raw)
    }

    #[test]
    fn disjoint_inserts_make_one_interval_each() {
        let mut map = AddressMap::default();
        for i in 0..4u64 {
            map.insert(i * 0x1000, i * 0x1000 + 0x100, buf(i + 1));
        }
        assert_eq!(map.interval_count(), 4);
        assert_eq!(map.resolve(0x2000), &[buf(3)]);
        assert_eq!(map.resolve(0x2100), &[] as &[Handle<Buffer>]);
    }

    #[test]
    fn overlapping_insert_joins_the_bucket() {
        let mut map = AddressMap::default();
        let k1 = map.insert(0x1000, 0x2000, buf(1));
        let k2 = map.insert(0x1800, 0x2800, buf(2));
        assert_eq!(k1, k2);
        assert_eq!(map.interval_count(), 1);
        assert_eq!(map.resolve(0x1900), &[buf(1), buf(2)]);
    }

    #[test]
    fn removing_one_of_several_keeps_the_interval() {
        let mut map = AddressMap::default();
        let key = map.insert(0x1000, 0x2000, buf(1));
        map.insert(0x1000, 0x2000, buf(2));

        map.remove(key, buf(1));
        assert_eq!(map.interval_count(), 1);
        assert_eq!(map.resolve(0x1000), &[buf(2)]);

        map.remove(key, buf(2));
        assert_eq!(map.interval_count(), 0);
        assert!(map.resolve(0x1000).is_empty());
    }

    #[test]
    fn insert_overlapping_from_below_joins_existing() {
        let mut map = AddressMap::default();
        let k1 = map.insert(0x2000, 0x3000, buf(1));
        // New range starts below but reaches into the existing interval.
        let k2 = map.insert(0x1000, 0x2800, buf(2));
        assert_eq!(k1, k2);
        assert_eq!(map.interval_count(), 1);
    }

    #[test]
    fn empty_range_is_ignored() {
        let mut map = AddressMap::default();
        map.insert(0x1000, 0x1000, buf(1));
        assert_eq!(map.interval_count(), 0);
    }
}
