use std::path::Path;

use tracing::info;

use crate::memory::EMPTY_MEMORY;

/// Built-in persona preamble, used unless `agent.persona_path` is set.
pub const DEFAULT_PERSONA: &str = "ТЫ — ПЕРСОНАЛЬНЫЙ ИИ-АССИСТЕНТ. Ты знаешь пользователя лично и опираешься на всё, что о нём запомнил.

ЯЗЫК:
- отвечай только на русском языке и не смешивай языки в одном ответе;
- иностранные слова транслитерируй или поясняй по-русски.";

const RULES: &str = "ПРАВИЛА:
1. Не выдумывай о пользователе ничего, чего нет в разделе «О ПОЛЬЗОВАТЕЛЕ».
2. Не упоминай прошлые разговоры, если их нет в памяти.
3. Если в памяти написано «ПАМЯТЬ ПУСТАЯ», это первый разговор.
4. Если чего-то не знаешь, честно скажи «Я пока этого не знаю» или попроси рассказать.
5. Используй известное о пользователе, чтобы советы учитывали его интересы, цели и предпочтения.
6. Новое, что пользователь рассказывает о себе, сохраняется автоматически.
7. Будь дружелюбным, кратким и тёплым; к личной информации относись бережно.";

/// Persona preamble: contents of `path` if given, otherwise [`DEFAULT_PERSONA`].
pub fn load_persona(path: Option<&Path>) -> anyhow::Result<String> {
    let Some(path) = path else {
        return Ok(DEFAULT_PERSONA.to_string());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read persona file {}: {e}", path.display()))?;
    if content.trim().is_empty() {
        anyhow::bail!("persona file {} is empty", path.display());
    }
    info!(path = %path.display(), chars = content.chars().count(), "loaded persona");
    Ok(content.trim().to_string())
}

/// System instruction for one generation: persona, rules, then what is known.
pub fn system_prompt(persona: &str, context: &str) -> String {
    let continuity = if context.contains(EMPTY_MEMORY) {
        "Это первый разговор, память пустая: узнавай пользователя постепенно."
    } else {
        "Это не первый разговор: у тебя есть память о пользователе."
    };
    format!("{persona}\n\nО ПОЛЬЗОВАТЕЛЕ (только то, что я действительно знаю):\n{context}\n\n{RULES}\n\n{continuity}")
}
