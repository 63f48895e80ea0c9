//! A payload is read as per-slice flags when every element is boolean-like,
//! otherwise as zero-based indices. Flags win ties: `[0, 1, 1]` is a flag
//! vector, never the index list `{0, 1}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TumorIndexSet(BTreeSet<usize>);

impl TumorIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn span(first: usize, last: usize) -> Self {
        Self((first..=last).collect())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn insert(&mut self, index: usize) -> bool {
        self.0.insert(index)
    }

    pub fn remove(&mut self, index: usize) -> bool {
        self.0.remove(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Sorted, 1-based.
    pub fn to_slice_numbers(&self) -> Vec<u32> {
        self.iter()
            .filter_map(|i| u32::try_from(i + 1).ok())
            .collect()
    }
}

impl FromIterator<usize> for TumorIndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionPayload {
    Flags(Vec<bool>),
    Indices(Vec<i64>),
}

impl PredictionPayload {
    /// `None` for anything that is not a JSON array.
    pub fn decode(raw: &Value) -> Option<Self> {
        let items = raw.as_array()?;

        let flags: Option<Vec<bool>> = items.iter().map(boolean_like).collect();
        if let Some(flags) = flags {
            return Some(Self::Flags(flags));
        }

        let indices = items
            .iter()
            .filter_map(coerce_number)
            .filter_map(as_integer)
            .collect();
        Some(Self::Indices(indices))
    }
}

pub fn normalize(slice_count: usize, payload: Option<&Value>) -> TumorIndexSet {
    if slice_count == 0 {
        return TumorIndexSet::new();
    }
    match payload.and_then(PredictionPayload::decode) {
        Some(decoded) => normalize_decoded(slice_count, &decoded),
        None => TumorIndexSet::new(),
    }
}

pub fn normalize_decoded(slice_count: usize, payload: &PredictionPayload) -> TumorIndexSet {
    match payload {
        PredictionPayload::Flags(flags) => flags
            .iter()
            .take(slice_count)
            .enumerate()
            .filter(|(_, positive)| **positive)
            .map(|(i, _)| i)
            .collect(),
        PredictionPayload::Indices(indices) => indices
            .iter()
            .filter_map(|&n| usize::try_from(n).ok())
            .filter(|&n| n < slice_count)
            .collect(),
    }
}

pub fn boolean_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            match s.as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" => Some(false),
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

fn as_integer(x: f64) -> Option<i64> {
    if x.fract() != 0.0 || x < i64::MIN as f64 || x > i64::MAX as f64 {
        return None;
    }
    Some(x as i64)
}
