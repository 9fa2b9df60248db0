//! Persisted knowledge types and the snapshot migration path.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

/// Current on-disk layout. Bump together with a new `migrate_vN` step.
pub const SCHEMA_VERSION: u32 = 1;

/// Category given to facts when the caller does not supply one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Errors from explicit profile edits.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unknown profile field '{0}' (available: {keys})", keys = ProfileField::accepted_keys().join(", "))]
    UnknownField(String),

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: ProfileField, value: String },

    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// The scalar fields of [`UserProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileField {
    Name,
    Nickname,
    Age,
    Location,
    Occupation,
}

/// Accepted spellings for each field, canonical key first.
const FIELD_ALIASES: &[(ProfileField, &[&str])] = &[
    (ProfileField::Name, &["name", "имя"]),
    (ProfileField::Nickname, &["nickname", "ник"]),
    (ProfileField::Age, &["age", "возраст"]),
    (ProfileField::Location, &["location", "город"]),
    (ProfileField::Occupation, &["occupation", "работа"]),
];

static FIELD_LOOKUP: LazyLock<HashMap<&'static str, ProfileField>> = LazyLock::new(|| {
    FIELD_ALIASES
        .iter()
        .flat_map(|(field, keys)| keys.iter().map(move |k| (*k, *field)))
        .collect()
});

impl ProfileField {
    pub const ALL: [ProfileField; 5] = [
        ProfileField::Name,
        ProfileField::Nickname,
        ProfileField::Age,
        ProfileField::Location,
        ProfileField::Occupation,
    ];

    /// Canonical key, as used in the snapshot and in model responses.
    pub fn key(&self) -> &'static str {
        FIELD_ALIASES
            .iter()
            .find(|(field, _)| field == self)
            .map(|(_, keys)| keys[0])
            .unwrap_or("unknown")
    }

    /// Human-facing label used when rendering context and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Name => "Имя",
            ProfileField::Nickname => "Прозвище",
            ProfileField::Age => "Возраст",
            ProfileField::Location => "Местоположение",
            ProfileField::Occupation => "Род занятий",
        }
    }

    /// Resolve a canonical key or a localized alias, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        FIELD_LOOKUP.get(key.trim().to_lowercase().as_str()).copied()
    }

    /// Every spelling `from_key` accepts, in table order.
    pub fn accepted_keys() -> Vec<&'static str> {
        FIELD_ALIASES
            .iter()
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect()
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A concrete value for one scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Age(u32),
}

impl FieldValue {
    /// Parse user-supplied text into the value type `field` stores.
    pub fn parse(field: ProfileField, raw: &str) -> Result<Self, ProfileError> {
        let trimmed = raw.trim();
        let invalid = || ProfileError::InvalidValue {
            field,
            value: raw.to_string(),
        };
        if trimmed.is_empty() {
            return Err(invalid());
        }
        match field {
            ProfileField::Age => trimmed.parse::<u32>().map(FieldValue::Age).map_err(|_| invalid()),
            _ => Ok(FieldValue::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Age(age) => write!(f, "{age}"),
        }
    }
}

/// Structured facts about the user. One per store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub age: Option<u32>,
    pub location: Option<String>,
    pub occupation: Option<String>,
    pub interests: Vec<String>,
    pub goals: Vec<String>,
    pub preferences: BTreeMap<String, String>,
}

impl UserProfile {
    pub fn get(&self, field: ProfileField) -> Option<FieldValue> {
        match field {
            ProfileField::Name => self.name.clone().map(FieldValue::Text),
            ProfileField::Nickname => self.nickname.clone().map(FieldValue::Text),
            ProfileField::Age => self.age.map(FieldValue::Age),
            ProfileField::Location => self.location.clone().map(FieldValue::Text),
            ProfileField::Occupation => self.occupation.clone().map(FieldValue::Text),
        }
    }

    /// Store `value` in `field`. Rejects a value of the wrong kind.
    pub fn set(&mut self, field: ProfileField, value: FieldValue) -> Result<(), ProfileError> {
        match (field, value) {
            (ProfileField::Age, FieldValue::Age(age)) => self.age = Some(age),
            (ProfileField::Name, FieldValue::Text(text)) => self.name = Some(text),
            (ProfileField::Nickname, FieldValue::Text(text)) => self.nickname = Some(text),
            (ProfileField::Location, FieldValue::Text(text)) => self.location = Some(text),
            (ProfileField::Occupation, FieldValue::Text(text)) => self.occupation = Some(text),
            (field, value) => {
                return Err(ProfileError::InvalidValue {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns `false` if the interest was already present.
    pub fn add_interest(&mut self, interest: &str) -> bool {
        push_unique(&mut self.interests, interest)
    }

    /// Returns `false` if the goal was already present.
    pub fn add_goal(&mut self, goal: &str) -> bool {
        push_unique(&mut self.goals, goal)
    }

    pub fn is_empty(&self) -> bool {
        ProfileField::ALL.iter().all(|f| self.get(*f).is_none())
            && self.interests.is_empty()
            && self.goals.is_empty()
            && self.preferences.is_empty()
    }
}

// Interests and goals compare as sets; their order only matters for display.
impl PartialEq for UserProfile {
    fn eq(&self, other: &Self) -> bool {
        fn as_set(items: &[String]) -> HashSet<&str> {
            items.iter().map(String::as_str).collect()
        }
        self.name == other.name
            && self.nickname == other.nickname
            && self.age == other.age
            && self.location == other.location
            && self.occupation == other.occupation
            && as_set(&self.interests) == as_set(&other.interests)
            && as_set(&self.goals) == as_set(&other.goals)
            && self.preferences == other.preferences
    }
}

pub(crate) fn push_unique(items: &mut Vec<String>, value: &str) -> bool {
    if items.iter().any(|existing| existing == value) {
        return false;
    }
    items.push(value.to_string());
    true
}

/// One remembered statement about the user. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub text: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub added_at: DateTime<Utc>,
    /// Day the fact was learned, `YYYY-MM-DD`.
    #[serde(default)]
    pub session: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub relation: String,
    #[serde(default)]
    pub details: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantDate {
    pub date: String,
    #[serde(default)]
    pub description: String,
    pub added_at: DateTime<Utc>,
}

/// Everything known about the user; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub schema_version: u32,
    pub user_profile: UserProfile,
    pub facts: Vec<Fact>,
    pub relationships: BTreeMap<String, Relationship>,
    pub important_dates: BTreeMap<String, ImportantDate>,
    pub habits: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user_profile: UserProfile::default(),
            facts: Vec::new(),
            relationships: BTreeMap::new(),
            important_dates: BTreeMap::new(),
            habits: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// True when nothing at all is known about the user.
    pub fn is_empty(&self) -> bool {
        self.user_profile.is_empty()
            && self.facts.is_empty()
            && self.relationships.is_empty()
            && self.important_dates.is_empty()
            && self.habits.is_empty()
    }

    /// Parse a snapshot document, migrating older layouts first.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let value = migrate(value)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Bring a raw snapshot document up to [`SCHEMA_VERSION`].
///
/// Only keys that are present are rewritten; missing keys stay missing so a
/// partial document can still be merged key-by-key on import.
pub fn migrate(mut raw: Value) -> anyhow::Result<Value> {
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("snapshot is not a JSON object"))?;

    let version = match obj.get("schemaVersion") {
        None => 0,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| anyhow::anyhow!("schemaVersion must be a non-negative integer"))?,
    };

    if version > SCHEMA_VERSION {
        anyhow::bail!(
            "snapshot schema version {version} is newer than supported version {SCHEMA_VERSION}"
        );
    }

    if version == 0 {
        migrate_v0(obj);
    }

    obj.insert("schemaVersion".into(), Value::from(SCHEMA_VERSION));
    Ok(raw)
}

/// Version 0 is the unversioned snake_case layout with naive local
/// timestamps and a free-form `age`.
fn migrate_v0(obj: &mut Map<String, Value>) {
    rename_key(obj, "user_profile", "userProfile");
    rename_key(obj, "important_dates", "importantDates");
    rename_key(obj, "created_at", "createdAt");
    rename_key(obj, "updated_at", "updatedAt");
    obj.remove("conversations_summary");

    for key in ["createdAt", "updatedAt"] {
        if let Some(ts) = obj.get_mut(key) {
            normalize_timestamp(ts);
        }
    }

    if let Some(Value::Array(facts)) = obj.get_mut("facts") {
        for fact in facts.iter_mut().filter_map(Value::as_object_mut) {
            rename_key(fact, "fact", "text");
            migrate_added_at(fact);
        }
    }

    for key in ["relationships", "importantDates"] {
        if let Some(Value::Object(entries)) = obj.get_mut(key) {
            for entry in entries.values_mut().filter_map(Value::as_object_mut) {
                migrate_added_at(entry);
            }
        }
    }

    if let Some(Value::Object(profile)) = obj.get_mut("userProfile") {
        if let Some(age) = profile.get_mut("age") {
            *age = match age {
                Value::String(s) => s
                    .trim()
                    .parse::<u32>()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                Value::Number(n) => n.as_u64().map(Value::from).unwrap_or(Value::Null),
                _ => Value::Null,
            };
        }
    }
}

fn migrate_added_at(entry: &mut Map<String, Value>) {
    rename_key(entry, "added_at", "addedAt");
    if let Some(ts) = entry.get_mut("addedAt") {
        normalize_timestamp(ts);
    }
}

fn rename_key(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if obj.contains_key(to) {
        return;
    }
    if let Some(value) = obj.remove(from) {
        obj.insert(to.to_string(), value);
    }
}

/// Rewrite a naive local ISO-8601 timestamp as RFC 3339 UTC. Values that
/// already carry an offset are left alone.
fn normalize_timestamp(ts: &mut Value) {
    let Value::String(s) = ts else {
        return;
    };
    if DateTime::parse_from_rfc3339(s).is_ok() {
        return;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
        *ts = Value::String(local.to_rfc3339());
    }
}
