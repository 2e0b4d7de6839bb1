//! Collection edits shared by the optimistic path and the change feed.
//!
//! Every function checks for existence first, so applying the same change
//! twice leaves the collection as applying it once. Each returns whether the
//! collection changed.

use crate::core::{Record, is_provisional};
use im::Vector;
use std::collections::HashSet;

pub fn position<T: Record>(records: &Vector<T>, id: &str) -> Option<usize> {
    records.iter().position(|record| record.id() == id)
}

/// Prepends `record` unless its identifier is already present.
pub fn apply_insert<T: Record>(records: &mut Vector<T>, record: T) -> bool {
    if position(records, record.id()).is_some() {
        return false;
    }
    records.push_front(record);
    true
}

/// Replaces the record with the same identifier in place; absent is a no-op.
pub fn apply_update<T: Record>(records: &mut Vector<T>, record: T) -> bool {
    match position(records, record.id()) {
        Some(index) if records[index] != record => {
            records.set(index, record);
            true
        }
        _ => false,
    }
}

pub fn apply_delete<T: Record>(records: &mut Vector<T>, id: &str) -> bool {
    match position(records, id) {
        Some(index) => {
            records.remove(index);
            true
        }
        None => false,
    }
}

/// Swaps the provisional record for the confirmed one.
///
/// The confirmed record takes the provisional slot. If the feed echo already
/// inserted it elsewhere, that copy is dropped so identifiers stay unique. If
/// the provisional record is gone (a resync replaced the collection) the
/// confirmed record is upserted instead.
pub fn confirm_create<T: Record>(records: &mut Vector<T>, provisional: &str, confirmed: T) -> bool {
    let Some(slot) = position(records, provisional) else {
        return match position(records, confirmed.id()) {
            Some(_) => apply_update(records, confirmed),
            None => apply_insert(records, confirmed),
        };
    };

    records.set(slot, confirmed);
    let confirmed_id = records[slot].id().to_string();
    let echo = records
        .iter()
        .enumerate()
        .position(|(index, record)| index != slot && record.id() == confirmed_id);
    if let Some(index) = echo {
        records.remove(index);
    }
    true
}

/// Builds a collection from a fetched list, keeping the first occurrence of
/// each identifier.
pub fn dedupe<T: Record>(fetched: Vec<T>) -> Vector<T> {
    let mut seen = HashSet::new();
    fetched
        .into_iter()
        .filter(|record| seen.insert(record.id().to_string()))
        .collect()
}

/// Replaces the collection with `fetched`, keeping provisional records of
/// creates still in flight at the front.
pub fn replace_all<T: Record>(records: &mut Vector<T>, fetched: Vec<T>) {
    let mut next: Vector<T> = records
        .iter()
        .filter(|record| is_provisional(record.id()))
        .cloned()
        .collect();
    next.append(dedupe(fetched));
    *records = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Task, TaskPatch, TaskStatus};
    use chrono::Utc;

    fn task(id: &str, title: &str) -> Task {
        let patch = TaskPatch {
            title: Some(title.to_string()),
            ..Default::default()
        };
        Task::draft(id.to_string(), Utc::now(), &patch)
    }

    fn ids(records: &Vector<Task>) -> Vec<&str> {
        records.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_insert_twice_is_insert_once() {
        let mut records: Vector<Task> = vec![task("a", "A")].into();

        assert!(apply_insert(&mut records, task("b", "B")));
        let once = records.clone();
        assert!(!apply_insert(&mut records, task("b", "B")));

        assert_eq!(records, once);
        assert_eq!(ids(&records), vec!["b", "a"]);
    }

    #[test]
    fn test_update_and_delete_of_absent_records_are_noops() {
        let mut records: Vector<Task> = vec![task("a", "A")].into();

        assert!(!apply_update(&mut records, task("zzz", "ghost")));
        assert!(!apply_delete(&mut records, "zzz"));
        assert_eq!(ids(&records), vec!["a"]);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut records: Vector<Task> = vec![task("a", "A"), task("b", "B")].into();
        let mut done = task("a", "A");
        done.status = Some(TaskStatus::Done);

        assert!(apply_update(&mut records, done.clone()));
        assert!(!apply_update(&mut records, done));

        assert_eq!(ids(&records), vec!["a", "b"]);
        assert_eq!(records[0].status, Some(TaskStatus::Done));
    }

    #[test]
    fn test_confirm_create_replaces_provisional_slot() {
        let mut records: Vector<Task> =
            vec![task("temp-1", "Draft"), task("a", "A")].into();

        assert!(confirm_create(&mut records, "temp-1", task("real-1", "Draft")));

        assert_eq!(ids(&records), vec!["real-1", "a"]);
    }

    #[test]
    fn test_confirm_create_after_echo_keeps_one_copy() {
        let mut records: Vector<Task> =
            vec![task("real-1", "echo"), task("temp-1", "Draft"), task("a", "A")].into();

        confirm_create(&mut records, "temp-1", task("real-1", "Draft"));

        assert_eq!(ids(&records), vec!["real-1", "a"]);
        assert_eq!(records[0].title, "Draft");
    }

    #[test]
    fn test_replace_all_keeps_in_flight_creates() {
        let mut records: Vector<Task> = vec![task("temp-9", "Draft"), task("old", "Old")].into();

        replace_all(
            &mut records,
            vec![task("a", "A"), task("b", "B"), task("a", "dup")],
        );

        assert_eq!(ids(&records), vec!["temp-9", "a", "b"]);
        assert_eq!(records[1].title, "A");
    }
}
