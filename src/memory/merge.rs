use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::schema::{FieldValue, ProfileField, UserProfile};

/// Candidate values for the scalar profile fields.
///
/// `None` entries record an explicit "not mentioned" from the model and are
/// never written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    fields: BTreeMap<ProfileField, Option<FieldValue>>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: ProfileField, value: Option<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: ProfileField, value: Option<FieldValue>) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: ProfileField) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProfileField, Option<&FieldValue>)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build an update from a model-produced JSON object.
    ///
    /// Unknown keys are dropped. `age` accepts an integer or a string holding
    /// one; anything else drops only that field. Text fields must be
    /// non-empty strings.
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let mut update = Self::new();
        for (key, raw) in object {
            let Some(field) = ProfileField::from_key(key) else {
                debug!(key = %key, "ignoring unknown profile key");
                continue;
            };
            if raw.is_null() {
                update.insert(field, None);
                continue;
            }
            match coerce(field, raw) {
                Some(value) => update.insert(field, Some(value)),
                None => debug!(field = %field, value = %raw, "dropping uncoercible profile value"),
            }
        }
        update
    }
}

fn coerce(field: ProfileField, raw: &Value) -> Option<FieldValue> {
    match (field, raw) {
        (ProfileField::Age, Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok())
            .map(FieldValue::Age),
        (ProfileField::Age, Value::String(s)) => s.trim().parse::<u32>().ok().map(FieldValue::Age),
        (ProfileField::Age, _) => None,
        (_, Value::String(s)) if !s.trim().is_empty() => Some(FieldValue::Text(s.trim().to_string())),
        _ => None,
    }
}

/// Apply `updates` to `profile` and return the fields that actually changed.
///
/// A candidate is written only when the stored value is unset or differs, so
/// re-asserting a known value is a no-op and causes no save.
pub fn apply(updates: &ProfileUpdate, profile: &mut UserProfile) -> Vec<ProfileField> {
    let mut changed = Vec::new();
    for (field, candidate) in updates.iter() {
        let Some(candidate) = candidate else {
            continue;
        };
        if profile.get(field).as_ref() == Some(candidate) {
            continue;
        }
        match profile.set(field, candidate.clone()) {
            Ok(()) => changed.push(field),
            Err(e) => debug!(field = %field, "skipping profile update: {e}"),
        }
    }
    changed
}
