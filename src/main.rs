use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use confidant::agent::commands::{self, Command, CommandOutcome};
use confidant::agent::providers::{self, LlmProvider};
use confidant::agent::{AgentEvent, Conversation, TurnError};
use confidant::config::{self, ConfidantConfig};
use confidant::memory::{ProfileStore, render_summary};

#[derive(Parser)]
#[command(name = "confidant")]
#[command(about = "A personal assistant that remembers you between conversations")]
#[command(version)]
struct Cli {
    /// Model to use instead of the configured one
    #[arg(short, long, global = true, env = "CONFIDANT_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Print everything remembered about the user
    Memory,
    /// Write the memory snapshot to a file
    Export {
        /// Destination JSON file
        path: PathBuf,
    },
    /// Merge a memory snapshot from a file
    Import {
        /// Source JSON file
        path: PathBuf,
    },
    /// List models available on the backend
    Models,
    /// Show version, configuration and memory statistics
    Status,
    /// Write a default config file
    Init {
        /// Where to write it (default ~/.confidant/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so the chat on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Init { path, force }) = &cli.command {
        return init(path.clone(), *force);
    }

    let mut config = config::load()?;
    if let Some(model) = cli.model {
        config.agent.model = model;
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat(config).await,
        Commands::Memory => {
            let store = open_store(&config);
            println!(
                "{}",
                render_summary(store.snapshot(), config.memory.summary_facts)
            );
            Ok(())
        }
        Commands::Export { path } => {
            let store = open_store(&config);
            store.export(&path)?;
            println!("Память экспортирована в {}", path.display());
            Ok(())
        }
        Commands::Import { path } => {
            let mut store = open_store(&config);
            store.import(&path)?;
            println!("Память импортирована из {}", path.display());
            Ok(())
        }
        Commands::Models => {
            let provider = providers::from_config(&config)?;
            for model in provider.list_models().await? {
                println!("{model}");
            }
            Ok(())
        }
        Commands::Status => {
            let store = open_store(&config);
            let snapshot = store.snapshot();
            println!("confidant v{}", env!("CARGO_PKG_VERSION"));
            println!("provider: {} ({})", config.agent.provider, config.agent.base_url());
            println!("model: {}", config.agent.model);
            println!("memory: {}", store.path().display());
            println!("facts: {}", snapshot.facts.len());
            println!("relationships: {}", snapshot.relationships.len());
            println!("important dates: {}", snapshot.important_dates.len());
            if let Some(updated) = snapshot.updated_at {
                println!("updated: {}", updated.to_rfc3339());
            }
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

fn init(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => confidant::fs_util::home_dir()?
            .join(".confidant")
            .join("config.toml"),
    };
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    config::save_to_path(&ConfidantConfig::default(), &path)?;
    println!("Конфигурация записана в {}", path.display());
    Ok(())
}

fn open_store(config: &ConfidantConfig) -> ProfileStore {
    let store = ProfileStore::load(config.memory.memory_file());
    if let Some(warning) = store.load_warning() {
        eprintln!("warning: {warning}");
    }
    store
}

async fn ensure_model(provider: &dyn LlmProvider, config: &ConfidantConfig) -> anyhow::Result<()> {
    let models = provider.list_models().await.map_err(|e| {
        anyhow::anyhow!(
            "backend at {} is not reachable: {e}",
            config.agent.base_url()
        )
    })?;
    let wanted = &config.agent.model;
    let tagged = format!("{wanted}:latest");
    if !models.iter().any(|m| m == wanted || *m == tagged) {
        anyhow::bail!(
            "model '{}' is not available; installed: {}",
            config.agent.model,
            if models.is_empty() {
                "none".to_string()
            } else {
                models.join(", ")
            }
        );
    }
    Ok(())
}

async fn chat(config: ConfidantConfig) -> anyhow::Result<()> {
    let provider: Arc<dyn LlmProvider> = Arc::from(providers::from_config(&config)?);
    ensure_model(provider.as_ref(), &config).await?;

    let store = open_store(&config);
    let mut conversation = Conversation::new(&config, provider, store)?;

    println!("confidant ({}). /help — команды, /exit — выход.", config.agent.model);
    if let Some(name) = &conversation.store().profile().name {
        println!("С возвращением, {name}!");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nВы: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = Command::parse(input) {
            match commands::execute(&command, &mut conversation) {
                CommandOutcome::Exit => break,
                CommandOutcome::Reply(text) => println!("{text}"),
            }
            continue;
        }

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(32);
        let printer = tokio::spawn(async move {
            print!("\nАссистент: ");
            let _ = std::io::stdout().flush();
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::Text(chunk) => {
                        print!("{chunk}");
                        let _ = std::io::stdout().flush();
                    }
                    AgentEvent::Done => break,
                    AgentEvent::Error(_) => {}
                }
            }
            println!();
        });

        let result = conversation.process_message(input, Some(tx)).await;
        let _ = printer.await;
        match result {
            Ok(_) => {}
            Err(TurnError::EmptyMessage) => {}
            Err(e) => eprintln!("Ошибка: {e}"),
        }
    }

    println!("До встречи!");
    Ok(())
}
