// ============================================================================
// Statistics Aggregator
// ============================================================================
//
// A pure function of the collection: totals, per-field category counts, sums
// of numeric fields and the first N records. The store recomputes it from
// scratch after every change to the collection; nothing is carried over
// between computations.
//
// ============================================================================

use crate::core::Record;
use im::Vector;
use std::collections::BTreeMap;

/// Bucket for records whose categorical field is unset.
pub const UNKNOWN_BUCKET: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct Statistics<T> {
    pub total: usize,
    /// field -> category -> count. Every breakdown field is present.
    pub breakdowns: BTreeMap<&'static str, BTreeMap<String, usize>>,
    /// field -> sum over records; unset values count as zero.
    pub totals: BTreeMap<&'static str, f64>,
    /// First N records in collection order.
    pub recent: Vec<T>,
}

impl<T> Default for Statistics<T> {
    fn default() -> Self {
        Self {
            total: 0,
            breakdowns: BTreeMap::new(),
            totals: BTreeMap::new(),
            recent: Vec::new(),
        }
    }
}

impl<T: Record> Statistics<T> {
    pub fn compute(records: &Vector<T>, recent_limit: usize) -> Self {
        let mut breakdowns: BTreeMap<&'static str, BTreeMap<String, usize>> = T::BREAKDOWN_FIELDS
            .iter()
            .map(|field| (*field, BTreeMap::new()))
            .collect();
        let mut totals: BTreeMap<&'static str, f64> =
            T::MEASURE_FIELDS.iter().map(|field| (*field, 0.0)).collect();

        for record in records {
            for (field, counts) in breakdowns.iter_mut() {
                let bucket = record.category(field).unwrap_or(UNKNOWN_BUCKET);
                *counts.entry(bucket.to_string()).or_insert(0) += 1;
            }
            for (field, sum) in totals.iter_mut() {
                *sum += record.measure(field).unwrap_or(0.0);
            }
        }

        Self {
            total: records.len(),
            breakdowns,
            totals,
            recent: records.iter().take(recent_limit).cloned().collect(),
        }
    }

    pub fn breakdown(&self, field: &str) -> Option<&BTreeMap<String, usize>> {
        self.breakdowns.get(field)
    }

    /// Records whose `field` falls in `category`.
    pub fn count(&self, field: &str, category: &str) -> usize {
        self.breakdown(field)
            .and_then(|counts| counts.get(category))
            .copied()
            .unwrap_or(0)
    }

    pub fn sum(&self, field: &str) -> f64 {
        self.totals.get(field).copied().unwrap_or(0.0)
    }
}
