//! Fixed-capacity rolling windows and the statistics computed over them.

use medic_core::{Percentiles, Trend};
use std::collections::{BTreeMap, VecDeque};

/// Ring buffer holding the most recent `capacity` values.
#[derive(Debug, Clone)]
pub struct RingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingWindow<T> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, returning the evicted oldest value when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Copy> RingWindow<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().copied().collect()
    }
}

/// Keyed map holding at most `capacity` entries. Inserting a new key at
/// capacity evicts the least recently inserted or updated entry.
#[derive(Debug, Clone)]
pub struct RecencyMap<K, V> {
    entries: BTreeMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
    next_stamp: u64,
    capacity: usize,
}

impl<K: Ord + Clone, V> RecencyMap<K, V> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            order: BTreeMap::new(),
            next_stamp: 0,
            capacity: capacity.max(1),
        }
    }

    /// Insert or refresh `key`, returning the entry evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        if let Some((old_stamp, _)) = self.entries.insert(key.clone(), (stamp, value)) {
            self.order.remove(&old_stamp);
            self.order.insert(stamp, key);
            return None;
        }
        self.order.insert(stamp, key);

        if self.entries.len() <= self.capacity {
            return None;
        }
        let (_, oldest) = self.order.pop_first()?;
        self.entries
            .remove(&oldest)
            .map(|(_, value)| (oldest, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (stamp, value) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Nearest-rank p50/p95/p99. Empty input yields zeros; non-finite values are ignored.
pub fn percentiles(values: &[f64]) -> Percentiles {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Percentiles::default();
    }
    sorted.sort_by(f64::total_cmp);

    Percentiles {
        p50: nearest_rank(&sorted, 50.0),
        p95: nearest_rank(&sorted, 95.0),
        p99: nearest_rank(&sorted, 99.0),
    }
}

fn nearest_rank(sorted: &[f64], pct: f64) -> f64 {
    sorted[rank(sorted.len(), pct) - 1]
}

/// 1-based nearest rank of `pct` among `len` values. `len` must be non-zero.
fn rank(len: usize, pct: f64) -> usize {
    let rank = (pct * len as f64 / 100.0).ceil() as usize;
    rank.clamp(1, len)
}

/// Whether the nearest-rank `pct` percentile of `len` values lies strictly
/// above a threshold that exactly `above` of those values exceed.
pub fn percentile_exceeds(len: usize, above: usize, pct: f64) -> bool {
    if len == 0 {
        return false;
    }
    above > len - rank(len, pct)
}

/// Compare the mean of the recent half of `samples` against the older half.
///
/// A relative change within `dead_band_pct` is `Stable`. Fewer than four
/// samples never declare a direction.
pub fn classify_trend(samples: &[f64], dead_band_pct: f64) -> Trend {
    if samples.len() < 4 {
        return Trend::Stable;
    }

    let mid = samples.len() / 2;
    let previous = mean(&samples[..mid]);
    let recent = mean(&samples[mid..]);

    if previous == 0.0 {
        return if recent > 0.0 {
            Trend::Increasing
        } else {
            Trend::Stable
        };
    }

    let change_pct = (recent - previous) / previous.abs() * 100.0;
    if change_pct > dead_band_pct {
        Trend::Increasing
    } else if change_pct < -dead_band_pct {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_window_evicts_oldest() {
        let mut window = RingWindow::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.push(3), None);
        assert!(window.is_full());
        assert_eq!(window.push(4), Some(1));
        assert_eq!(window.to_vec(), vec![2, 3, 4]);
        assert_eq!(window.latest(), Some(&4));
    }

    #[test]
    fn zero_capacity_holds_one_value() {
        let mut window = RingWindow::new(0);
        window.push("a");
        window.push("b");
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.to_vec(), vec!["b"]);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let p = percentiles(&values);
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p95, 95.0);
        assert_eq!(p.p99, 99.0);

        let p = percentiles(&[300.0, 100.0, 200.0]);
        assert_eq!(p.p50, 200.0);
        assert_eq!(p.p95, 300.0);
    }

    #[test]
    fn recency_map_evicts_least_recently_touched() {
        let mut map = RecencyMap::new(2);
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("b", 2), None);
        // Refreshing "a" makes "b" the oldest.
        assert_eq!(map.insert("a", 3), None);
        assert_eq!(map.insert("c", 4), Some(("b", 2)));

        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&"a"));
        assert_eq!(map.remove(&"a"), Some(3));
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![4]);
        assert_eq!(map.insert("d", 5), None);
    }

    #[test]
    fn percentile_exceeds_agrees_with_sorting() {
        let values: Vec<f64> = (1..=40).map(|n| f64::from(n * 7 % 41)).collect();
        for threshold in [0.0, 10.0, 30.0, 37.0, 38.0, 39.0, 40.0, 50.0] {
            let above = values.iter().filter(|v| **v > threshold).count();
            assert_eq!(
                percentile_exceeds(values.len(), above, 95.0),
                percentiles(&values).p95 > threshold,
                "threshold {threshold}"
            );
        }
        assert!(!percentile_exceeds(0, 0, 95.0));
        assert!(percentile_exceeds(1, 1, 95.0));
    }

    #[test]
    fn percentiles_of_empty_input_are_zero() {
        assert_eq!(percentiles(&[]), Percentiles::default());
        assert_eq!(percentiles(&[f64::NAN]), Percentiles::default());
    }

    #[test]
    fn trend_respects_dead_band() {
        assert_eq!(classify_trend(&[10.0, 10.0, 11.0, 11.0], 20.0), Trend::Stable);
        assert_eq!(classify_trend(&[10.0, 10.0, 15.0, 15.0], 20.0), Trend::Increasing);
        assert_eq!(classify_trend(&[10.0, 10.0, 5.0, 5.0], 20.0), Trend::Decreasing);
    }

    #[test]
    fn trend_from_zero_baseline() {
        assert_eq!(classify_trend(&[0.0, 0.0, 0.0, 1.0], 20.0), Trend::Increasing);
        assert_eq!(classify_trend(&[0.0; 6], 20.0), Trend::Stable);
        assert_eq!(classify_trend(&[1.0, 0.0], 20.0), Trend::Stable);
    }
}
