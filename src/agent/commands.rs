//! Slash commands typed into the chat instead of a message.

use tracing::warn;

use super::Conversation;
use crate::memory::{ProfileField, render_summary};

/// Category stamped on facts added with `/fact`.
pub const MANUAL_CATEGORY: &str = "manual";

pub const HELP: &str = "Команды:
  /memory                  показать всё, что я помню
  /search <запрос>         найти факты
  /fact [#категория] <текст>  запомнить факт
  /set <поле> <значение>   задать поле профиля (имя, ник, возраст, город, работа)
  /clear                   очистить историю разговора (память сохраняется)
  /help                    эта справка
  /exit, /quit, /q         выйти";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Memory,
    Search(String),
    Fact {
        category: Option<String>,
        text: String,
    },
    Set {
        field: String,
        value: String,
    },
    Clear,
    Exit,
    /// Known command with missing arguments; holds the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// What the host should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Reply(String),
    Exit,
}

impl Command {
    /// Parse `input` as a command. `None` if it does not start with `/`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let rest = input.strip_prefix('/')?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "help" => Command::Help,
            "memory" => Command::Memory,
            "clear" => Command::Clear,
            "exit" | "quit" | "q" => Command::Exit,
            "search" if args.is_empty() => Command::Usage("/search <запрос>"),
            "search" => Command::Search(args.to_string()),
            "fact" => parse_fact(args),
            "set" => match args.split_once(char::is_whitespace) {
                Some((field, value)) if !value.trim().is_empty() => Command::Set {
                    field: field.to_string(),
                    value: value.trim().to_string(),
                },
                _ => Command::Usage("/set <поле> <значение>"),
            },
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

fn parse_fact(args: &str) -> Command {
    const USAGE: &str = "/fact [#категория] <текст>";
    let (category, text) = match args.strip_prefix('#') {
        Some(tagged) => match tagged.split_once(char::is_whitespace) {
            Some((category, text)) => (Some(category.to_string()), text.trim()),
            None => return Command::Usage(USAGE),
        },
        None => (None, args),
    };
    if text.is_empty() {
        return Command::Usage(USAGE);
    }
    Command::Fact {
        category,
        text: text.to_string(),
    }
}

/// Run `command` against the conversation. Failures become reply text.
pub fn execute(command: &Command, conversation: &mut Conversation) -> CommandOutcome {
    let reply = match command {
        Command::Exit => return CommandOutcome::Exit,
        Command::Help => HELP.to_string(),
        Command::Memory => render_summary(
            conversation.store().snapshot(),
            conversation.summary_facts(),
        ),
        Command::Search(query) => {
            let found = conversation.store().search_facts(query);
            if found.is_empty() {
                format!("Ничего не найдено по запросу «{query}».")
            } else {
                let lines: Vec<String> = found
                    .iter()
                    .map(|fact| format!("  • {} [{}]", fact.text, fact.category))
                    .collect();
                format!("Найдено фактов: {}\n{}", found.len(), lines.join("\n"))
            }
        }
        Command::Fact { category, text } => {
            let category = category.as_deref().unwrap_or(MANUAL_CATEGORY);
            match conversation.store_mut().add_fact(text, Some(category)) {
                Ok(fact) => format!("Запомнил: {} [{}]", fact.text, fact.category),
                Err(e) => {
                    warn!("failed to add fact: {e}");
                    format!("Не удалось сохранить факт: {e}")
                }
            }
        }
        Command::Set { field, value } => {
            match conversation.store_mut().set_profile_field(field, value) {
                Ok(field) => set_confirmation(field, value),
                Err(e) => format!("Ошибка: {e}"),
            }
        }
        Command::Clear => {
            conversation.clear_history();
            "История разговора очищена, память сохранена.".to_string()
        }
        Command::Usage(usage) => format!("Использование: {usage}"),
        Command::Unknown(name) => format!("Неизвестная команда /{name}. Введите /help."),
    };
    CommandOutcome::Reply(reply)
}

fn set_confirmation(field: ProfileField, value: &str) -> String {
    format!("{} = {}", field.label(), value.trim())
}
