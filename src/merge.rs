//! Structural merge for partial updates.
//!
//! Partial updates are expressed as values of the same type with unset
//! fields left as `None` or empty. Merging never erases: `None` leaves the
//! current value alone and arrays only grow, skipping elements that are
//! structurally equal to one already present.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Folds an incoming partial value into `self`.
pub trait Merge {
    /// Applies `incoming` on top of `self`.
    fn merge(&mut self, incoming: Self);
}

macro_rules! merge_by_replace {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Merge for $ty {
                fn merge(&mut self, incoming: Self) {
                    *self = incoming;
                }
            }
        )*
    };
}

merge_by_replace!(String, bool, u32, u64, i64, f64, NaiveDate, DateTime<Utc>, crate::uri::IdentityHash);

impl Merge for serde_json::Value {
    fn merge(&mut self, incoming: Self) {
        use serde_json::Value;

        match (self, incoming) {
            (_, Value::Null) => {}
            (Value::Object(current), Value::Object(next)) => {
                for (key, value) in next {
                    match current.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            current.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(current), Value::Array(next)) => {
                let mut seen: HashSet<String> = current.iter().map(Value::to_string).collect();
                for value in next {
                    if seen.insert(value.to_string()) {
                        current.push(value);
                    }
                }
            }
            (current, next) => *current = next,
        }
    }
}

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, incoming: Self) {
        let Some(next) = incoming else {
            return;
        };
        match self {
            Some(current) => current.merge(next),
            None => *self = Some(next),
        }
    }
}

/// Stable structural key used to de-duplicate array elements.
fn structural_key<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl<T: Serialize> Merge for Vec<T> {
    fn merge(&mut self, incoming: Self) {
        let mut seen: HashSet<String> = self.iter().map(structural_key).collect();
        for value in incoming {
            if seen.insert(structural_key(&value)) {
                self.push(value);
            }
        }
    }
}

impl<T: Merge> Merge for BTreeMap<String, T> {
    fn merge(&mut self, incoming: Self) {
        for (key, value) in incoming {
            match self.get_mut(&key) {
                Some(existing) => existing.merge(value),
                None => {
                    self.insert(key, value);
                }
            }
        }
    }
}
