//! Online order statistics.
//!
//! Keeps the `k` smallest values of a stream under an injected ordering, so
//! with [`Greater`] it keeps the `k` largest. Once every slot is filled the
//! values form a heap whose root is the [`biggest`](OrderStatistics::biggest)
//! element, the next one to be displaced. Most candidates are rejected by a
//! single comparison against the root.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::{AddAssign, Index};

use crate::codec::{hash_str, join_delimited, split_delimited, Delimited};
use crate::constants::MOMENTS_DELIMITER;
use crate::error::ParseError;

/// A strict weak ordering on `T`.
pub trait Compare<T>: Clone + Debug + Default {
    /// True if `a` is ordered before `b`.
    fn less(&self, a: &T, b: &T) -> bool;

    /// The total order used for sorting, treating incomparable values as equal.
    fn ordering(&self, a: &T, b: &T) -> Ordering {
        if self.less(a, b) {
            Ordering::Less
        } else if self.less(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// The natural order: keep the smallest values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Less;

/// The reversed order: keep the largest values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Greater;

impl<T: PartialOrd> Compare<T> for Less {
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }
}

impl<T: PartialOrd> Compare<T> for Greater {
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        a > b
    }
}

/// The first `k` order statistics of a stream.
///
/// The filled values occupy the tail of `statistics`; `unused` counts the
/// free slots in front of them.
#[derive(Clone, Debug)]
pub struct OrderStatistics<T, C, O = Less> {
    statistics: C,
    unused: usize,
    /// False after sorting or restoring, until the heap is rebuilt.
    heap_valid: bool,
    order: O,
    _value: PhantomData<T>,
}

/// Order statistics with a capacity fixed at compile time.
pub type OrderStatisticsStack<T, const N: usize, O = Less> = OrderStatistics<T, [T; N], O>;

/// Order statistics with a capacity chosen at run time.
pub type OrderStatisticsHeap<T, O = Less> = OrderStatistics<T, Vec<T>, O>;

impl<T: Clone + Default, const N: usize, O: Compare<T>> Default for OrderStatistics<T, [T; N], O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default, const N: usize, O: Compare<T>> OrderStatistics<T, [T; N], O> {
    /// An empty accumulator for the first `N` order statistics.
    pub fn new() -> Self {
        Self::from_container(std::array::from_fn(|_| T::default()))
    }
}

impl<T: Clone + Default, O: Compare<T>> OrderStatistics<T, Vec<T>, O> {
    /// An empty accumulator for the first `n` order statistics.
    pub fn new(n: usize) -> Self {
        Self::from_container(vec![T::default(); n])
    }

    /// Clear and change the number of statistics kept.
    pub fn resize(&mut self, n: usize) {
        self.statistics = vec![T::default(); n];
        self.unused = n;
        self.heap_valid = true;
    }
}

impl<T, C, O> OrderStatistics<T, C, O>
where
    T: Clone + Default,
    C: AsRef<[T]> + AsMut<[T]>,
    O: Compare<T>,
{
    fn from_container(statistics: C) -> Self {
        let unused = statistics.as_ref().len();
        Self {
            statistics,
            unused,
            heap_valid: true,
            order: O::default(),
            _value: PhantomData,
        }
    }

    /// Number of statistics currently held.
    pub fn count(&self) -> usize {
        self.capacity() - self.unused
    }

    /// Number of statistics that can be held.
    pub fn capacity(&self) -> usize {
        self.statistics.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The statistics held, in heap order unless [`sort`](Self::sort) was
    /// called since the last update.
    pub fn as_slice(&self) -> &[T] {
        &self.statistics.as_ref()[self.unused..]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// True if [`add`](Self::add) would keep `x`.
    pub fn would_add(&self, x: &T) -> bool {
        self.unused > 0 || self.biggest().map_or(true, |biggest| self.order.less(x, biggest))
    }

    /// Offer `x`, returning true if it was kept.
    pub fn add(&mut self, x: T) -> bool {
        if self.unused > 0 {
            self.unused -= 1;
            self.statistics.as_mut()[self.unused] = x;
            if self.unused == 0 {
                self.make_heap();
            }
            return true;
        }
        if self.capacity() == 0 {
            return false;
        }
        if !self.heap_valid {
            self.make_heap();
        }
        if self.order.less(&x, &self.statistics.as_ref()[0]) {
            self.statistics.as_mut()[0] = x;
            self.sift_down(0);
            return true;
        }
        false
    }

    /// Offer every value in `xs`, returning true if any was kept.
    pub fn add_all<I: IntoIterator<Item = T>>(&mut self, xs: I) -> bool {
        let mut result = false;
        for x in xs {
            result |= self.add(x);
        }
        result
    }

    /// Offer `n` copies of `x`.
    pub fn add_copies(&mut self, x: T, n: usize) -> bool {
        let mut result = false;
        for _ in 0..n.min(self.capacity()) {
            result |= self.add(x.clone());
        }
        result
    }

    /// The statistic that the next kept value will displace.
    pub fn biggest(&self) -> Option<&T> {
        let values = self.as_slice();
        if values.is_empty() {
            return None;
        }
        if self.unused == 0 && self.heap_valid {
            return values.first();
        }
        values
            .iter()
            .reduce(|biggest, x| if self.order.less(biggest, x) { x } else { biggest })
    }

    /// Sort the statistics in ascending order.
    pub fn sort(&mut self) {
        let order = self.order.clone();
        let unused = self.unused;
        self.statistics.as_mut()[unused..].sort_by(|a, b| order.ordering(a, b));
        self.heap_valid = false;
    }

    /// The statistics sorted in ascending order, leaving these untouched.
    pub fn sorted(&self) -> Vec<T> {
        let mut result = self.as_slice().to_vec();
        result.sort_by(|a, b| self.order.ordering(a, b));
        result
    }

    /// Remove every statistic.
    pub fn clear(&mut self) {
        let unused = self.unused;
        for x in &mut self.statistics.as_mut()[unused..] {
            *x = T::default();
        }
        self.unused = self.capacity();
        self.heap_valid = true;
    }

    fn make_heap(&mut self) {
        let n = self.capacity();
        for i in (0..n / 2).rev() {
            self.sift_down(i);
        }
        self.heap_valid = true;
    }

    /// Restore the heap below `i`, whose children are already heaps.
    fn sift_down(&mut self, mut i: usize) {
        let order = self.order.clone();
        let heap = self.statistics.as_mut();
        let n = heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < n && order.less(&heap[left], &heap[right]) {
                child = right;
            }
            if !order.less(&heap[i], &heap[child]) {
                break;
            }
            heap.swap(i, child);
            i = child;
        }
    }
}

impl<C, O> OrderStatistics<f64, C, O>
where
    C: AsRef<[f64]> + AsMut<[f64]>,
    O: Compare<f64>,
{
    /// Decay the statistics by `factor`, which should be in `(0, 1]`.
    ///
    /// Values are multiplied or divided by `factor`, whichever moves the
    /// biggest value further from being displaced.
    pub fn age(&mut self, factor: f64) {
        let Some(&x) = self.as_slice().first() else {
            return;
        };
        let factor = if self.order.less(&(x * factor), &x) {
            1.0 / factor
        } else {
            factor
        };
        let unused = self.unused;
        for x in &mut self.statistics.as_mut()[unused..] {
            *x *= factor;
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

impl<T, C, O> OrderStatistics<T, C, O>
where
    T: Clone + Default + Delimited,
    C: AsRef<[T]> + AsMut<[T]>,
    O: Compare<T>,
{
    /// The held statistics joined by the moments delimiter, empty if none
    /// are held. Statistics are written last slot first.
    pub fn to_delimited(&self) -> String {
        let reversed: Vec<T> = self.as_slice().iter().rev().cloned().collect();
        join_delimited(&reversed, MOMENTS_DELIMITER)
    }

    /// Replace the statistics with those in `value`.
    ///
    /// The empty string restores an empty accumulator. The heap is rebuilt
    /// on the next update.
    pub fn restore(&mut self, value: &str) -> Result<(), ParseError> {
        self.clear();
        let values: Vec<T> = split_delimited(value, MOMENTS_DELIMITER)?;
        if values.len() > self.capacity() {
            tracing::error!(value, capacity = self.capacity(), "Too many order statistics");
            return Err(ParseError::WrongLength {
                expected: self.capacity(),
                found: values.len(),
            });
        }
        for x in values {
            self.unused -= 1;
            self.statistics.as_mut()[self.unused] = x;
        }
        self.heap_valid = false;
        Ok(())
    }

    /// Checksum of the sorted statistics, `seed` if none are held.
    pub fn checksum(&self, seed: u64) -> u64 {
        if self.is_empty() {
            return seed;
        }
        hash_str(seed, &join_delimited(&self.sorted(), MOMENTS_DELIMITER))
    }
}

impl<T, C, O> Index<usize> for OrderStatistics<T, C, O>
where
    T: Clone + Default,
    C: AsRef<[T]> + AsMut<[T]>,
    O: Compare<T>,
{
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.as_slice()[i]
    }
}

impl<T, C, O> AddAssign<&OrderStatistics<T, C, O>> for OrderStatistics<T, C, O>
where
    T: Clone + Default,
    C: AsRef<[T]> + AsMut<[T]>,
    O: Compare<T>,
{
    fn add_assign(&mut self, rhs: &OrderStatistics<T, C, O>) {
        for x in rhs.iter() {
            self.add(x.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_smallest() {
        let mut min = OrderStatisticsStack::<f64, 3>::new();
        for x in [5.0, 1.0, 9.0, 3.0, 7.0, 0.5, 2.0] {
            min.add(x);
        }
        assert_eq!(min.count(), 3);
        assert_eq!(min.biggest(), Some(&2.0));
        assert_eq!(min.sorted(), vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_keeps_largest_with_greater() {
        let mut max = OrderStatisticsHeap::<f64, Greater>::new(2);
        assert!(max.add_all([1.0, 4.0, 2.0, 8.0, 3.0]));
        assert_eq!(max.biggest(), Some(&4.0));
        assert_eq!(max.sorted(), vec![8.0, 4.0]);
        assert!(!max.would_add(&3.0));
        assert!(max.would_add(&5.0));
    }

    #[test]
    fn test_biggest_before_full() {
        let mut min = OrderStatisticsStack::<f64, 4>::new();
        assert_eq!(min.biggest(), None);
        min.add(1.0);
        min.add(3.0);
        min.add(2.0);
        assert_eq!(min.biggest(), Some(&3.0));
        assert!(min.would_add(&100.0));
    }

    #[test]
    fn test_sort_then_add_rebuilds_heap() {
        let mut min = OrderStatisticsStack::<f64, 3>::new();
        min.add_all([4.0, 6.0, 5.0]);
        min.sort();
        assert_eq!(min.as_slice(), &[4.0, 5.0, 6.0]);
        assert_eq!(min.biggest(), Some(&6.0));
        assert!(min.add(1.0));
        assert_eq!(min.sorted(), vec![1.0, 4.0, 5.0]);
        assert!(!min.add(5.5));
    }

    #[test]
    fn test_pairs_order_lexicographically() {
        let mut min = OrderStatisticsStack::<(f64, i64), 1>::new();
        min.add((2.0, 10));
        min.add((1.0, 20));
        min.add((1.0, 5));
        assert_eq!(min[0], (1.0, 5));
    }

    #[test]
    fn test_age_moves_away_from_displacement() {
        let mut min = OrderStatisticsStack::<f64, 2>::new();
        min.add_all([2.0, 4.0]);
        min.age(0.5);
        assert_eq!(min.sorted(), vec![4.0, 8.0]);

        let mut max = OrderStatisticsStack::<f64, 2, Greater>::new();
        max.add_all([2.0, 4.0]);
        max.age(0.5);
        assert_eq!(max.sorted(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_merge() {
        let mut a = OrderStatisticsStack::<f64, 2>::new();
        a.add_all([3.0, 5.0]);
        let mut b = OrderStatisticsStack::<f64, 2>::new();
        b.add_all([1.0, 4.0]);
        a += &b;
        assert_eq!(a.sorted(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut min = OrderStatisticsHeap::<f64>::new(4);
        min.add_all([0.1, 7.5, -3.25, 2.0, 9.0, 1.0 / 3.0]);
        let text = min.to_delimited();
        let mut restored = OrderStatisticsHeap::<f64>::new(4);
        restored.restore(&text).unwrap();
        assert_eq!(restored.as_slice(), min.as_slice());
        assert_eq!(restored.checksum(3), min.checksum(3));
        assert_eq!(restored.biggest(), min.biggest());

        assert!(restored.add(-10.0));
        assert_eq!(restored.sorted(), vec![-10.0, -3.25, 0.1, 1.0 / 3.0]);
    }

    #[test]
    fn test_empty_persists_to_empty_string() {
        let min = OrderStatisticsStack::<f64, 3>::new();
        assert_eq!(min.to_delimited(), "");
        assert_eq!(min.checksum(42), 42);
        let mut restored = OrderStatisticsStack::<f64, 3>::new();
        restored.add(1.0);
        restored.restore("").unwrap();
        assert!(restored.is_empty());
        assert!(restored.restore("1:2:3:4").is_err());
        assert!(restored.restore("1:x").is_err());
    }
}
