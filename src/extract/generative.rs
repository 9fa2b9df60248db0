//! Model-backed fact and profile extraction.
//!
//! Model output is untrusted text: the JSON payload is cut out of whatever
//! surrounds it and anything that fails to parse yields an empty result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::ExtractionStrategy;
use crate::agent::providers::LlmProvider;
use crate::memory::{ProfileField, ProfileUpdate, UserProfile};
use crate::types::ChatMessage;

/// Reference answers shown to the model in the profile prompt:
/// (fact, expected JSON object).
pub const PROFILE_EXAMPLES: &[(&str, &str)] = &[
    (
        "меня зовут Ололол, но ты можешь звать меня Ололоша",
        r#"{"name": "Ололол", "nickname": "Ололоша", "age": null, "location": null, "occupation": null}"#,
    ),
    (
        "мне 25 лет",
        r#"{"name": null, "nickname": null, "age": 25, "location": null, "occupation": null}"#,
    ),
    (
        "я живу в Москве",
        r#"{"name": null, "nickname": null, "age": null, "location": "Москва", "occupation": null}"#,
    ),
];

pub fn facts_prompt(utterance: &str, context: &str) -> String {
    format!(
        "Проанализируй сообщение пользователя и выдели новые сведения о нём.

ЧТО Я УЖЕ ЗНАЮ:
{context}

СООБЩЕНИЕ ПОЛЬЗОВАТЕЛЯ:
{utterance}

Ответь ТОЛЬКО JSON-массивом строк:
[\"факт 1\", \"факт 2\"]

Если нового ничего нет, ответь пустым массивом [].

Правила:
- записывай конкретные устойчивые факты: имена, даты, интересы, предпочтения, работу, место жительства;
- не записывай то, что уже известно;
- не записывай временные состояния (\"мне грустно\", \"сейчас слушаю джаз\");
- если пользователь просто назвал своё имя (например, \"Ололо\"), запиши факт \"Пользователя зовут Ололо\";
- пиши факты на том же языке, на котором пишет пользователь."
    )
}

pub fn profile_prompt(facts: &[String], profile: &UserProfile) -> String {
    let facts_text = facts
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    let current = ProfileField::ALL
        .iter()
        .map(|field| {
            let value = profile
                .get(*field)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "не указано".into());
            format!("- {}: {value}", field.label())
        })
        .collect::<Vec<_>>()
        .join("\n");
    let examples = PROFILE_EXAMPLES
        .iter()
        .map(|(fact, json)| format!("- \"{fact}\" → {json}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "По фактам о пользователе заполни поля его профиля.

ФАКТЫ:
{facts_text}

ТЕКУЩИЙ ПРОФИЛЬ:
{current}

Ответь ТОЛЬКО JSON-объектом ровно с этими полями:
{{\"name\": \"имя или null\", \"nickname\": \"прозвище или null\", \"age\": число или null, \"location\": \"город или null\", \"occupation\": \"род занятий или null\"}}

Если в фактах нет сведений для поля, поставь null.
Если поле уже заполнено и факты ему не противоречат, тоже можно поставить null.
age должен быть числом, например 25, а не \"25\".

Примеры:
{examples}"
    )
}

/// Pull a JSON array of facts out of a model response.
///
/// Non-string and empty elements are dropped; any parse failure gives an
/// empty list.
pub fn parse_fact_list(response: &str) -> Vec<String> {
    let Some(payload) = slice_between(response, '[', ']') else {
        debug!("no JSON array in fact extraction response");
        return Vec::new();
    };
    match serde_json::from_str::<Vec<Value>>(payload) {
        Ok(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Err(e) => {
            debug!("unparseable fact list: {e}");
            Vec::new()
        }
    }
}

/// Pull a profile update object out of a model response.
pub fn parse_profile_updates(response: &str) -> ProfileUpdate {
    let Some(payload) = slice_between(response, '{', '}') else {
        debug!("no JSON object in profile extraction response");
        return ProfileUpdate::new();
    };
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => ProfileUpdate::from_json(&map),
        Ok(_) => ProfileUpdate::new(),
        Err(e) => {
            debug!("unparseable profile update: {e}");
            ProfileUpdate::new()
        }
    }
}

/// Substring from the first `open` through the last `close`, inclusive.
fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Extraction through the generation backend.
pub struct GenerativeExtractor {
    provider: Arc<dyn LlmProvider>,
}

impl GenerativeExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    async fn ask(&self, prompt: String) -> anyhow::Result<String> {
        self.provider
            .complete(&[ChatMessage::user(prompt)], None)
            .await
    }
}

#[async_trait]
impl ExtractionStrategy for GenerativeExtractor {
    async fn extract_facts(
        &self,
        utterance: &str,
        _profile: &UserProfile,
        context: &str,
    ) -> anyhow::Result<Vec<String>> {
        let response = self.ask(facts_prompt(utterance, context)).await?;
        Ok(parse_fact_list(&response))
    }

    async fn extract_profile_updates(
        &self,
        _utterance: &str,
        facts: &[String],
        profile: &UserProfile,
    ) -> anyhow::Result<ProfileUpdate> {
        if facts.is_empty() {
            return Ok(ProfileUpdate::new());
        }
        let response = self.ask(profile_prompt(facts, profile)).await?;
        Ok(parse_profile_updates(&response))
    }
}
