use crate::addon::{AddonRecord, WorkshopItem};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub unique: Vec<WorkshopItem>,
    pub duplicates: Vec<WorkshopItem>,
}

// Records without a workshop ID are told apart by path.
fn identity(record: &AddonRecord) -> &str {
    if record.has_known_id() {
        &record.id
    } else {
        &record.path
    }
}

pub fn mounted_ids(existing: &[AddonRecord]) -> HashSet<&str> {
    existing
        .iter()
        .filter(|record| record.has_known_id())
        .map(|record| record.id.as_str())
        .collect()
}

pub fn merge(existing: &[AddonRecord], candidates: &[WorkshopItem]) -> MergeOutcome {
    let mounted = mounted_ids(existing);
    let (duplicates, unique): (Vec<WorkshopItem>, Vec<WorkshopItem>) = candidates
        .iter()
        .cloned()
        .partition(|item| mounted.contains(item.id.as_str()));
    MergeOutcome { unique, duplicates }
}

pub fn apply_full_order(existing: &[AddonRecord], candidates: &[AddonRecord]) -> Vec<AddonRecord> {
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(existing.len() + candidates.len());

    for candidate in candidates {
        let key = identity(candidate);
        if !emitted.insert(key) {
            continue;
        }
        let record = existing
            .iter()
            .find(|record| identity(record) == key)
            .unwrap_or(candidate);
        ordered.push(record.clone());
    }

    for record in existing {
        if emitted.insert(identity(record)) {
            ordered.push(record.clone());
        }
    }

    renumber(&mut ordered);
    ordered
}

pub fn remove(existing: &[AddonRecord], ids: &HashSet<String>) -> Vec<AddonRecord> {
    let mut kept: Vec<AddonRecord> = existing
        .iter()
        .filter(|record| !ids.contains(&record.id))
        .cloned()
        .collect();
    renumber(&mut kept);
    kept
}

pub fn position_of(records: &[AddonRecord], id: &str) -> Option<usize> {
    records.iter().position(|record| record.id == id)
}

pub fn move_up(records: &mut [AddonRecord], index: usize) -> bool {
    if index == 0 || index >= records.len() {
        return false;
    }
    records.swap(index, index - 1);
    renumber(records);
    true
}

pub fn move_down(records: &mut [AddonRecord], index: usize) -> bool {
    if index + 1 >= records.len() {
        return false;
    }
    records.swap(index, index + 1);
    renumber(records);
    true
}

pub fn move_to_top(records: &mut [AddonRecord], index: usize) -> bool {
    if index == 0 || index >= records.len() {
        return false;
    }
    records[..=index].rotate_right(1);
    renumber(records);
    true
}

pub fn move_to_bottom(records: &mut [AddonRecord], index: usize) -> bool {
    if index + 1 >= records.len() {
        return false;
    }
    records[index..].rotate_left(1);
    renumber(records);
    true
}

pub fn reorder_by_ids(records: &[AddonRecord], ids: &[String]) -> (Vec<AddonRecord>, Vec<String>) {
    let mut placed = vec![false; records.len()];
    let mut ordered = Vec::with_capacity(records.len());
    let mut unmatched = Vec::new();

    for id in ids {
        match records
            .iter()
            .enumerate()
            .find(|(idx, record)| !placed[*idx] && &record.id == id)
        {
            Some((idx, record)) => {
                placed[idx] = true;
                ordered.push(record.clone());
            }
            None => {
                if position_of(records, id).is_none() {
                    unmatched.push(id.clone());
                }
            }
        }
    }

    ordered.extend(
        records
            .iter()
            .zip(&placed)
            .filter(|(_, placed)| !**placed)
            .map(|(record, _)| record.clone()),
    );
    renumber(&mut ordered);
    (ordered, unmatched)
}

pub fn renumber(records: &mut [AddonRecord]) {
    for (idx, record) in records.iter_mut().enumerate() {
        record.sequence = idx + 1;
    }
}
