use crate::{
    predictions::{normalize_decoded, PredictionPayload, TumorIndexSet},
    state::StudyRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fills the span between the first and last positive flag when the payload
/// carries exactly one flag per slice. Any other payload leaves `tumor_set`
/// as it is.
pub fn collapse(
    slice_count: usize,
    payload: Option<&PredictionPayload>,
    tumor_set: TumorIndexSet,
) -> TumorIndexSet {
    let Some(PredictionPayload::Flags(flags)) = payload else {
        return tumor_set;
    };
    if flags.len() != slice_count {
        return tumor_set;
    }

    let first = flags.iter().position(|&f| f);
    let last = flags.iter().rposition(|&f| f);
    match (first, last) {
        (Some(first), Some(last)) => TumorIndexSet::span(first, last),
        _ => tumor_set,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedSelection {
    pub tumor_set: TumorIndexSet,
    pub selected: TumorIndexSet,
}

pub fn derive_selection(slice_count: usize, raw: Option<&Value>) -> DerivedSelection {
    if slice_count == 0 {
        return DerivedSelection::default();
    }
    let payload = raw.and_then(PredictionPayload::decode);
    let tumor_set = payload
        .as_ref()
        .map(|p| normalize_decoded(slice_count, p))
        .unwrap_or_default();
    let selected = collapse(slice_count, payload.as_ref(), tumor_set.clone());
    DerivedSelection {
        tumor_set,
        selected,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceEntry {
    pub index: usize,
    pub name: String,
    pub has_tumor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceBrowser {
    entries: Vec<SliceEntry>,
    derived: DerivedSelection,
    selected: TumorIndexSet,
}

impl SliceBrowser {
    pub fn from_record(record: &StudyRecord) -> Self {
        let count = record.slice_count();
        let derived = derive_selection(count, record.predictions());
        let entries = (0..count)
            .map(|index| SliceEntry {
                index,
                name: slice_name(record, index),
                has_tumor: derived.selected.contains(index),
            })
            .collect();
        let selected = derived.selected.clone();
        Self {
            entries,
            derived,
            selected,
        }
    }

    pub fn entries(&self) -> &[SliceEntry] {
        &self.entries
    }

    pub fn derived(&self) -> &DerivedSelection {
        &self.derived
    }

    pub fn selected(&self) -> &TumorIndexSet {
        &self.selected
    }

    /// Out-of-range indices are ignored.
    pub fn set_selected(&mut self, index: usize, checked: bool) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        if checked {
            self.selected.insert(index)
        } else {
            self.selected.remove(index)
        }
    }

    pub fn resegment_slices(&self) -> Vec<u32> {
        self.selected.to_slice_numbers()
    }
}

fn slice_name(record: &StudyRecord, index: usize) -> String {
    match record.file_names.get(index) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("MRIm{:02}", index + 1),
    }
}
