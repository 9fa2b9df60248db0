//! Turns a [`Snapshot`] into text: a compact grounding context for the model
//! and a verbose summary for the user.

use super::schema::{ProfileField, Snapshot};

/// Returned by [`render`] when nothing is known. The persona prompt checks
/// for it to tell a first conversation from a returning user.
pub const EMPTY_MEMORY: &str =
    "ПАМЯТЬ ПУСТАЯ: я ещё ничего не знаю о пользователе. Это наш первый разговор.";

/// Render labeled sections for everything known, joined by blank lines.
///
/// Only the `recent_facts` most recent facts are included, oldest first.
pub fn render(snapshot: &Snapshot, recent_facts: usize) -> String {
    let profile = &snapshot.user_profile;
    let mut sections: Vec<String> = Vec::new();

    for field in ProfileField::ALL {
        if let Some(value) = profile.get(field) {
            let label = match field {
                ProfileField::Name => "Имя пользователя",
                _ => field.label(),
            };
            sections.push(format!("{label}: {value}"));
        }
    }

    if !profile.interests.is_empty() {
        sections.push(format!("Интересы: {}", profile.interests.join(", ")));
    }
    if !profile.goals.is_empty() {
        sections.push(format!("Цели: {}", profile.goals.join(", ")));
    }
    if !profile.preferences.is_empty() {
        let prefs: Vec<String> = profile
            .preferences
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        sections.push(format!("Предпочтения: {}", prefs.join(", ")));
    }

    if !snapshot.relationships.is_empty() {
        let people: Vec<String> = snapshot
            .relationships
            .iter()
            .map(|(name, rel)| format!("{name} ({})", rel.relation))
            .collect();
        sections.push(format!("Близкие люди: {}", people.join(", ")));
    }

    if !snapshot.important_dates.is_empty() {
        let dates: Vec<String> = snapshot
            .important_dates
            .iter()
            .map(|(label, date)| format!("{label}: {}", date.date))
            .collect();
        sections.push(format!("Важные даты: {}", dates.join(", ")));
    }

    if !snapshot.habits.is_empty() {
        sections.push(format!("Привычки: {}", snapshot.habits.join(", ")));
    }

    if !snapshot.facts.is_empty() {
        let start = snapshot.facts.len().saturating_sub(recent_facts);
        let lines: Vec<String> = snapshot.facts[start..]
            .iter()
            .map(|fact| format!("- {}", fact.text))
            .collect();
        sections.push(format!("Что я знаю о пользователе:\n{}", lines.join("\n")));
    }

    if sections.is_empty() {
        return EMPTY_MEMORY.to_string();
    }
    sections.join("\n\n")
}

/// Verbose view of everything stored, with up to `max_facts` recent facts.
/// For display only; never sent to the model.
pub fn render_summary(snapshot: &Snapshot, max_facts: usize) -> String {
    let profile = &snapshot.user_profile;
    let mut lines = vec!["ПРОФИЛЬ ПОЛЬЗОВАТЕЛЯ".to_string(), "=".repeat(40)];

    for field in ProfileField::ALL {
        if let Some(value) = profile.get(field) {
            lines.push(format!("{}: {value}", field.label()));
        }
    }

    push_list(&mut lines, "Интересы", profile.interests.iter().cloned());
    push_list(&mut lines, "Цели", profile.goals.iter().cloned());
    push_list(
        &mut lines,
        "Предпочтения",
        profile.preferences.iter().map(|(k, v)| format!("{k}: {v}")),
    );

    if !snapshot.relationships.is_empty() {
        lines.push(String::new());
        lines.push("Близкие люди:".into());
        for (name, rel) in &snapshot.relationships {
            lines.push(format!("  • {name}: {}", rel.relation));
            if !rel.details.is_empty() {
                lines.push(format!("    {}", rel.details));
            }
        }
    }

    if !snapshot.important_dates.is_empty() {
        lines.push(String::new());
        lines.push("Важные даты:".into());
        for (label, date) in &snapshot.important_dates {
            lines.push(format!("  • {label}: {}", date.date));
            if !date.description.is_empty() {
                lines.push(format!("    {}", date.description));
            }
        }
    }

    push_list(&mut lines, "Привычки", snapshot.habits.iter().cloned());

    if !snapshot.facts.is_empty() {
        lines.push(String::new());
        lines.push(format!("Все факты ({}):", snapshot.facts.len()));
        let start = snapshot.facts.len().saturating_sub(max_facts);
        for fact in &snapshot.facts[start..] {
            lines.push(format!("  • {}", fact.text));
        }
    }

    if snapshot.is_empty() {
        lines.push(String::new());
        lines.push(
            "Профиль пуст. Расскажите о себе или заполните поля командой /set.".to_string(),
        );
    }

    lines.join("\n")
}

fn push_list(lines: &mut Vec<String>, title: &str, items: impl Iterator<Item = String>) {
    let items: Vec<String> = items.collect();
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(format!("{title}:"));
    lines.extend(items.into_iter().map(|item| format!("  • {item}")));
}
