use chrono::{Local, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::merge::{self, ProfileUpdate};
use super::schema::{
    DEFAULT_CATEGORY, Fact, FieldValue, ImportantDate, ProfileError, ProfileField, Relationship,
    Snapshot, UserProfile, migrate, push_unique,
};
use crate::fs_util::write_atomic;

/// Owns the user's [`Snapshot`] and keeps it in sync with one JSON file.
///
/// Every mutator changes memory and then saves before returning. There is no
/// locking: one process, one writer.
pub struct ProfileStore {
    path: PathBuf,
    snapshot: Snapshot,
    session: String,
    load_warning: Option<String>,
}

impl ProfileStore {
    /// Load the snapshot at `path`.
    ///
    /// A missing or unreadable file yields an empty store; the reason is
    /// logged and kept in [`ProfileStore::load_warning`]. Never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (snapshot, load_warning) = match read_snapshot(&path) {
            Ok(Some(snapshot)) => {
                info!(
                    path = %path.display(),
                    facts = snapshot.facts.len(),
                    "loaded memory snapshot"
                );
                (snapshot, None)
            }
            Ok(None) => {
                debug!(path = %path.display(), "no memory snapshot yet, starting empty");
                (Snapshot::new(), None)
            }
            Err(e) => {
                let message = format!("failed to load memory from {}: {e}", path.display());
                warn!("{message}; starting with empty memory");
                (Snapshot::new(), Some(message))
            }
        };

        Self {
            path,
            snapshot,
            session: Local::now().format("%Y-%m-%d").to_string(),
            load_warning,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn profile(&self) -> &UserProfile {
        &self.snapshot.user_profile
    }

    /// Why the last load fell back to an empty store, if it did.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    /// Identifier stamped on facts added by this process (the start day).
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Refresh `updatedAt` and write the whole snapshot.
    pub fn save(&mut self) -> anyhow::Result<()> {
        self.snapshot.updated_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(&self.snapshot)?;
        write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), "saved memory snapshot");
        Ok(())
    }

    pub fn add_fact(&mut self, text: &str, category: Option<&str>) -> anyhow::Result<Fact> {
        let fact = Fact {
            text: text.to_string(),
            category: category.unwrap_or(DEFAULT_CATEGORY).to_string(),
            added_at: Utc::now(),
            session: self.session.clone(),
        };
        debug!(category = %fact.category, "adding fact");
        self.snapshot.facts.push(fact.clone());
        self.save()?;
        Ok(fact)
    }

    /// Set one scalar field from a key (canonical or localized) and raw text.
    ///
    /// Unknown keys and unparseable values leave the profile untouched.
    pub fn set_profile_field(&mut self, key: &str, value: &str) -> Result<ProfileField, ProfileError> {
        let field =
            ProfileField::from_key(key).ok_or_else(|| ProfileError::UnknownField(key.to_string()))?;
        let value = FieldValue::parse(field, value)?;
        self.set_field(field, value)?;
        Ok(field)
    }

    pub fn set_field(&mut self, field: ProfileField, value: FieldValue) -> Result<(), ProfileError> {
        self.snapshot.user_profile.set(field, value)?;
        self.save()?;
        Ok(())
    }

    /// Merge model- or heuristic-derived updates, saving only on change.
    pub fn apply_updates(&mut self, updates: &ProfileUpdate) -> anyhow::Result<Vec<ProfileField>> {
        let changed = merge::apply(updates, &mut self.snapshot.user_profile);
        if !changed.is_empty() {
            info!(fields = ?changed, "profile updated");
            self.save()?;
        }
        Ok(changed)
    }

    /// Returns `Ok(false)` when the interest was already known (nothing saved).
    pub fn add_interest(&mut self, interest: &str) -> anyhow::Result<bool> {
        let added = self.snapshot.user_profile.add_interest(interest);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn add_goal(&mut self, goal: &str) -> anyhow::Result<bool> {
        let added = self.snapshot.user_profile.add_goal(goal);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn add_habit(&mut self, habit: &str) -> anyhow::Result<bool> {
        let added = push_unique(&mut self.snapshot.habits, habit);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn set_preference(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.snapshot
            .user_profile
            .preferences
            .insert(key.to_string(), value.to_string());
        self.save()
    }

    /// Add or replace the entry for `name`.
    pub fn add_relationship(&mut self, name: &str, relation: &str, details: &str) -> anyhow::Result<()> {
        self.snapshot.relationships.insert(
            name.to_string(),
            Relationship {
                relation: relation.to_string(),
                details: details.to_string(),
                added_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Add or replace the entry for `label`.
    pub fn add_important_date(&mut self, label: &str, date: &str, description: &str) -> anyhow::Result<()> {
        self.snapshot.important_dates.insert(
            label.to_string(),
            ImportantDate {
                date: date.to_string(),
                description: description.to_string(),
                added_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Facts whose text contains `query`, ignoring case, oldest first.
    pub fn search_facts(&self, query: &str) -> Vec<&Fact> {
        let query = query.to_lowercase();
        self.snapshot
            .facts
            .iter()
            .filter(|fact| fact.text.to_lowercase().contains(&query))
            .collect()
    }

    /// Write the snapshot as-is to an arbitrary path, owner-only like the
    /// live file.
    pub fn export(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot)?;
        write_atomic(path, &json)?;
        info!(path = %path.display(), "exported memory");
        Ok(())
    }

    /// Overlay the top-level keys of the snapshot at `path` onto this store.
    ///
    /// Keys present in the file replace the current values wholesale; keys it
    /// lacks are kept. The store is unchanged if the result does not parse.
    pub fn import(&mut self, path: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let incoming: Value = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid snapshot at {}: {e}", path.display()))?;
        let incoming = migrate(incoming)?;

        let mut merged = serde_json::to_value(&self.snapshot)?;
        if let (Some(current), Some(incoming)) = (merged.as_object_mut(), incoming.as_object()) {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        }

        let snapshot: Snapshot = serde_json::from_value(merged)
            .map_err(|e| anyhow::anyhow!("imported snapshot is not valid: {e}"))?;
        self.snapshot = snapshot;
        self.save()?;
        info!(path = %path.display(), "imported memory");
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> anyhow::Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Snapshot::from_json(&content).map(Some)
}
