use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ReconcileResult;

pub const SPEC_PREFIX: &str = "Spec";

/// One top-level field whose desired and latest values differ.
#[derive(Clone, Debug, PartialEq)]
pub struct Difference {
    pub path: String,
    pub desired: Value,
    pub latest: Value,
}

/// key: spec-delta
/// Field-path level comparison between two versions of the same spec.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delta {
    differences: Vec<Difference>,
}

impl Delta {
    /// Compares the serialized forms field by field. Optional fields that are
    /// unset serialize as absent, so `None` and `Some("")` stay distinct while
    /// collections that are skipped when empty compare equal to absence.
    pub fn between<T: Serialize + ?Sized>(desired: &T, latest: &T) -> ReconcileResult<Self> {
        let desired = serde_json::to_value(desired)?;
        let latest = serde_json::to_value(latest)?;
        Ok(Self::between_values(&desired, &latest))
    }

    pub fn between_values(desired: &Value, latest: &Value) -> Self {
        let empty = Map::new();
        let (desired_fields, latest_fields) = match (desired, latest) {
            (Value::Object(d), Value::Object(l)) => (d, l),
            (Value::Object(d), Value::Null) => (d, &empty),
            (Value::Null, Value::Object(l)) => (&empty, l),
            _ if desired == latest => return Self::default(),
            _ => {
                return Self {
                    differences: vec![Difference {
                        path: SPEC_PREFIX.to_string(),
                        desired: desired.clone(),
                        latest: latest.clone(),
                    }],
                }
            }
        };

        let mut names: Vec<&String> = desired_fields.keys().chain(latest_fields.keys()).collect();
        names.sort();
        names.dedup();

        let differences = names
            .into_iter()
            .filter_map(|name| {
                let d = desired_fields.get(name).unwrap_or(&Value::Null);
                let l = latest_fields.get(name).unwrap_or(&Value::Null);
                (d != l).then(|| Difference {
                    path: field_path(name),
                    desired: d.clone(),
                    latest: l.clone(),
                })
            })
            .collect();
        Self { differences }
    }

    pub fn different_at(&self, path: &str) -> bool {
        self.differences.iter().any(|d| d.path == path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.differences.iter().map(|d| d.path.as_str())
    }

    pub fn differences(&self) -> &[Difference] {
        &self.differences
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }
}

/// `keySpec` -> `Spec.KeySpec`
fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{SPEC_PREFIX}.{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => SPEC_PREFIX.to_string(),
    }
}
