//! The outcome of a periodicity test.

use std::ops::AddAssign;

use seasonal_core::Time;

use crate::error::{Error, Result};
use crate::persist::{insert_display, parse_field, require, StateInserter, StateTraverser};

const START_OF_PARTITION_TAG: &str = "a";
const HAS_PERIODS_TAG: &str = "b";

/// A part of the window a period can be present in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    /// The whole window.
    Full = 0,
    /// The first part of each long period, e.g. the weekend.
    First = 1,
    /// The second part of each long period, e.g. the weekdays.
    Second = 2,
}

/// The periods present in an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    None = 0,
    Short = 1,
    Long = 2,
    Both = 3,
}

impl Period {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Period::None,
            1 => Period::Short,
            2 => Period::Long,
            _ => Period::Both,
        }
    }

    /// True if every period in `other` is also in `self`.
    pub fn contains(self, other: Period) -> bool {
        (self as u32) & (other as u32) == other as u32
    }
}

/// Which periods were found in which intervals, and where the partition
/// starts.
///
/// Each interval owns two bits of the mask: bit `2i` for the short period
/// and bit `2i + 1` for the long period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PeriodicityResult {
    start_of_partition: Time,
    periods: u32,
}

impl PeriodicityResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `period` in `interval` if `has_period`.
    pub fn add_if(&mut self, has_period: bool, interval: Interval, period: Period) {
        if has_period {
            self.periods |= (period as u32) << (2 * interval as u32);
        }
    }

    pub fn set_start_of_partition(&mut self, time: Time) {
        self.start_of_partition = time;
    }

    /// Offset of the first interval from the start of the window.
    pub fn start_of_partition(&self) -> Time {
        self.start_of_partition
    }

    /// True if any period was found anywhere.
    pub fn periodic(&self) -> bool {
        self.periods != 0
    }

    /// The periods found in `interval`.
    pub fn periods(&self, interval: Interval) -> Period {
        Period::from_bits(self.periods >> (2 * interval as u32))
    }

    /// Position of the trend of `period` in `interval` in the table returned
    /// by [`Periodicity::trends`](super::Periodicity::trends).
    ///
    /// `period` must be [`Period::Short`] or [`Period::Long`].
    pub fn index(interval: Interval, period: Period) -> usize {
        2 * interval as usize + (period as usize).saturating_sub(1)
    }

    /// A readable list of the periods found, named by `intervals` and
    /// `periods`, e.g. `{ 'weekend daily' 'weekdays daily' }`.
    pub fn print(&self, intervals: &[&str; 2], periods: &[&str; 2]) -> String {
        let mut result = String::from("{");
        let full = self.periods(Interval::Full);
        for (period, name) in [(Period::Short, periods[0]), (Period::Long, periods[1])] {
            if full.contains(period) {
                result.push_str(&format!(" '{}'", name));
            }
        }
        for (interval, interval_name) in [(Interval::First, intervals[0]), (Interval::Second, intervals[1])] {
            let found = self.periods(interval);
            for (period, name) in [(Period::Short, periods[0]), (Period::Long, periods[1])] {
                if found.contains(period) {
                    result.push_str(&format!(" '{} {}'", interval_name, name));
                }
            }
        }
        result.push_str(" }");
        result
    }

    pub fn checksum(&self) -> u64 {
        let periods = u64::from(self.periods);
        (periods + 1)
            .wrapping_mul(self.start_of_partition as u64)
            .wrapping_add(periods)
    }

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        insert_display(inserter, START_OF_PARTITION_TAG, self.start_of_partition);
        insert_display(inserter, HAS_PERIODS_TAG, self.periods);
    }

    pub fn restore(traverser: &dyn StateTraverser) -> Result<Self> {
        let mut start_of_partition = None;
        let mut periods = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                START_OF_PARTITION_TAG => start_of_partition = Some(parse_field(entry.value(tag)?)?),
                HAS_PERIODS_TAG => periods = Some(parse_field::<u32>(entry.value(tag)?)?),
                _ => {}
            }
        }
        let periods = require(periods, HAS_PERIODS_TAG, "periodicity result")?;
        if periods >= 1 << 6 {
            return Err(Error::BadState(format!("periods mask {} out of range", periods)));
        }
        Ok(Self {
            start_of_partition: require(start_of_partition, START_OF_PARTITION_TAG, "periodicity result")?,
            periods,
        })
    }
}

impl AddAssign<&PeriodicityResult> for PeriodicityResult {
    /// Union the periods found, if both results agree on the partition.
    fn add_assign(&mut self, other: &PeriodicityResult) {
        if self.start_of_partition == other.start_of_partition {
            self.periods |= other.periods;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::StateDocument;

    #[test]
    fn test_add_if_sets_interval_bits() {
        let mut result = PeriodicityResult::new();
        assert!(!result.periodic());
        result.add_if(false, Interval::Full, Period::Short);
        assert!(!result.periodic());

        result.add_if(true, Interval::First, Period::Short);
        result.add_if(true, Interval::Second, Period::Long);
        assert!(result.periodic());
        assert_eq!(result.periods(Interval::Full), Period::None);
        assert_eq!(result.periods(Interval::First), Period::Short);
        assert_eq!(result.periods(Interval::Second), Period::Long);

        result.add_if(true, Interval::First, Period::Long);
        assert_eq!(result.periods(Interval::First), Period::Both);
    }

    #[test]
    fn test_index_layout() {
        assert_eq!(PeriodicityResult::index(Interval::Full, Period::Short), 0);
        assert_eq!(PeriodicityResult::index(Interval::Full, Period::Long), 1);
        assert_eq!(PeriodicityResult::index(Interval::First, Period::Short), 2);
        assert_eq!(PeriodicityResult::index(Interval::First, Period::Long), 3);
        assert_eq!(PeriodicityResult::index(Interval::Second, Period::Short), 4);
        assert_eq!(PeriodicityResult::index(Interval::Second, Period::Long), 5);
    }

    #[test]
    fn test_merge_requires_matching_partition() {
        let mut a = PeriodicityResult::new();
        a.add_if(true, Interval::Full, Period::Short);
        let mut b = PeriodicityResult::new();
        b.add_if(true, Interval::Full, Period::Long);

        let mut merged = a;
        merged += &b;
        assert_eq!(merged.periods(Interval::Full), Period::Both);

        b.set_start_of_partition(3600);
        let mut unmerged = a;
        unmerged += &b;
        assert_eq!(unmerged, a);
    }

    #[test]
    fn test_print() {
        let mut result = PeriodicityResult::new();
        assert_eq!(result.print(&["weekend", "weekdays"], &["daily", "weekly"]), "{ }");
        result.add_if(true, Interval::Full, Period::Short);
        result.add_if(true, Interval::Second, Period::Both);
        assert_eq!(
            result.print(&["weekend", "weekdays"], &["daily", "weekly"]),
            "{ 'daily' 'weekdays daily' 'weekdays weekly' }"
        );
    }

    #[test]
    fn test_checksum() {
        let mut result = PeriodicityResult::new();
        result.add_if(true, Interval::Full, Period::Long);
        result.set_start_of_partition(10);
        assert_eq!(result.checksum(), 3 * 10 + 2);
    }

    #[test]
    fn test_persistence() {
        let mut result = PeriodicityResult::new();
        result.add_if(true, Interval::First, Period::Both);
        result.set_start_of_partition(172_800);

        let mut document = StateDocument::new();
        result.persist(&mut document);
        let json = document.to_json_string();
        let restored = PeriodicityResult::restore(&StateDocument::from_json_str(&json).unwrap()).unwrap();
        assert_eq!(restored, result);
        assert_eq!(restored.checksum(), result.checksum());

        let mut partial = StateDocument::new();
        partial.insert_value(HAS_PERIODS_TAG, "1".to_string());
        assert!(matches!(
            PeriodicityResult::restore(&partial),
            Err(Error::MissingTag { tag: "a", .. })
        ));
    }
}
