//! Deterministic name/nickname detection. No model calls.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::ExtractionStrategy;
use crate::memory::{FieldValue, ProfileField, ProfileUpdate, UserProfile};

/// Words that look like names in a short reply but are not.
const STOP_WORDS: &[&str] = &[
    "меня", "зовут", "мое", "моё", "я", "но", "ты", "можешь", "звать", "зови", "привет", "пока",
    "да", "нет", "спасибо", "пожалуйста", "как", "что", "где", "когда", "почему", "кто", "это",
    "то", "все", "всё",
];

/// Matches shorter than this are rejected.
const MIN_MATCH_CHARS: usize = 3;

// Patterns run against the lower-cased utterance; the first accepted capture wins.
static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bменя\s+зовут\s+([а-яёa-z]+)",
        r"\bмо[её]\s+имя\s+([а-яёa-z]+)",
        r"\bя\s+—\s+([а-яёa-z]+)",
        r"\bя\s+([а-яёa-z]+)(?:\s*,|\s+но\b)",
    ])
});

static NICKNAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bно\s+ты\s+можешь\s+звать\s+меня\s+([а-яёa-z]+)",
        r"\bможешь\s+звать\s+меня\s+([а-яёa-z]+)",
        r"\bзвать\s+меня\s+([а-яёa-z]+)",
        r"\bзови\s+меня\s+([а-яёa-z]+)",
        r"\bпрозвище\s+([а-яёa-z]+)",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static name pattern is valid"))
        .collect()
}

/// Name and/or nickname the utterance would change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameDetection {
    pub name: Option<String>,
    pub nickname: Option<String>,
}

impl NameDetection {
    pub fn to_update(&self) -> ProfileUpdate {
        let mut update = ProfileUpdate::new();
        if let Some(name) = &self.name {
            update.insert(ProfileField::Name, Some(FieldValue::Text(name.clone())));
        }
        if let Some(nickname) = &self.nickname {
            update.insert(ProfileField::Nickname, Some(FieldValue::Text(nickname.clone())));
        }
        update
    }
}

/// Look for the user's name or nickname in `utterance`.
///
/// Two independent strategies:
/// - a one- or two-word capitalized reply is taken as the name, but only while
///   the profile has neither name nor nickname;
/// - phrase patterns ("меня зовут X", "зови меня X", ...) apply regardless
///   of profile state.
///
/// Returns `None` when nothing found differs from the profile.
///
/// Known edge case: any capitalized one-word answer given before the profile
/// has a name is taken as the name, even if it answers an unrelated question.
pub fn try_extract_name(utterance: &str, profile: &UserProfile) -> Option<NameDetection> {
    let name = short_reply_name(utterance, profile)
        .or_else(|| first_match(&NAME_PATTERNS, utterance))
        .filter(|name| profile.name.as_deref() != Some(name.as_str()));

    let nickname = first_match(&NICKNAME_PATTERNS, utterance)
        .filter(|nick| profile.nickname.as_deref() != Some(nick.as_str()));

    if name.is_none() && nickname.is_none() {
        return None;
    }
    Some(NameDetection { name, nickname })
}

fn short_reply_name(utterance: &str, profile: &UserProfile) -> Option<String> {
    if profile.name.is_some() || profile.nickname.is_some() {
        return None;
    }
    let words: Vec<&str> = utterance.split_whitespace().collect();
    if words.is_empty() || words.len() > 2 {
        return None;
    }
    let first = words[0];
    let starts_upper = first.chars().next().is_some_and(char::is_uppercase);
    if starts_upper
        && first.chars().all(char::is_alphabetic)
        && first.chars().count() >= 2
        && !is_stop_word(first)
    {
        return Some(first.to_string());
    }
    None
}

fn first_match(patterns: &[Regex], utterance: &str) -> Option<String> {
    let lower = utterance.trim().to_lowercase();
    patterns
        .iter()
        .filter_map(|pattern| pattern.captures(&lower))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .find(|candidate| candidate.chars().count() >= MIN_MATCH_CHARS && !is_stop_word(candidate))
        .map(capitalize)
}

fn is_stop_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOP_WORDS.contains(&lower.as_str())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fact recorded when the fast path learns the user's name.
pub fn name_fact(name: &str) -> String {
    format!("Пользователя зовут {name}")
}

/// Whether a fact already talks about the user's name.
pub fn mentions_name(fact: &str) -> bool {
    let lower = fact.to_lowercase();
    ["зовут", "имя", "name"].iter().any(|kw| lower.contains(kw))
}

/// The deterministic strategy: regexes and a short-reply heuristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastPathExtractor;

#[async_trait]
impl ExtractionStrategy for FastPathExtractor {
    async fn extract_facts(
        &self,
        utterance: &str,
        profile: &UserProfile,
        _context: &str,
    ) -> anyhow::Result<Vec<String>> {
        Ok(try_extract_name(utterance, profile)
            .and_then(|detection| detection.name)
            .map(|name| vec![name_fact(&name)])
            .unwrap_or_default())
    }

    async fn extract_profile_updates(
        &self,
        utterance: &str,
        _facts: &[String],
        profile: &UserProfile,
    ) -> anyhow::Result<ProfileUpdate> {
        Ok(try_extract_name(utterance, profile)
            .map(|detection| detection.to_update())
            .unwrap_or_default())
    }
}
