use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use seekpanel::config::{Config, ConfigSource, Overrides};
use seekpanel::events::{PanelCommand, PanelEvent};
use seekpanel::llm::OllamaClient;
use seekpanel::relay::SubmissionOutcome;
use seekpanel::session::PanelSession;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,seekpanel=info";

#[derive(Parser)]
#[command(name = "seekpanel")]
#[command(version = "0.1.0")]
#[command(about = "Chat with a local Ollama model from the terminal", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.seekpanel/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model server URL, overrides the config file and OLLAMA_HOST
    #[arg(long, global = true)]
    server: Option<String>,

    /// Model to select at startup
    #[arg(long, global = true)]
    model: Option<String>,

    /// Show a placeholder while the model is reasoning
    #[arg(long, global = true)]
    show_thinking: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and stream the answer to stdout
    Ask {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// List configured models
    Models {
        /// List the models installed on the server instead
        #[arg(long)]
        remote: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

impl Cli {
    fn config_source(&self) -> Result<ConfigSource> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => Config::default_path()?,
        };
        Ok(ConfigSource::new(path).with_overrides(Overrides {
            server_url: self.server.clone(),
            show_thinking: self.show_thinking,
        }))
    }

    fn load_config(&self) -> Result<Config> {
        self.config_source()?.load()
    }

    fn session(
        &self,
        config: Config,
    ) -> Result<(Arc<PanelSession>, mpsc::UnboundedReceiver<PanelEvent>)> {
        let backend = Arc::new(OllamaClient::new()?);
        let (session, events) = PanelSession::new(config, backend);
        if let Some(model) = &self.model {
            session.store().set_model(model.clone());
        }
        Ok((Arc::new(session), events))
    }
}

/// Log to ~/.seekpanel/logs/seekpanel.log; the panel owns the terminal
fn init_file_logging() -> Result<()> {
    let log_dir = Config::home_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("seekpanel.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        None => {
            init_file_logging()?;
            run_panel(&cli).await
        }
        Some(Commands::Ask { prompt }) => {
            init_stderr_logging();
            ask(&cli, &prompt.join(" ")).await
        }
        Some(Commands::Models { remote }) => {
            init_stderr_logging();
            list_models(&cli, *remote).await
        }
        Some(Commands::Config { write }) => {
            init_stderr_logging();
            show_config(&cli, *write)
        }
    }
}

async fn run_panel(cli: &Cli) -> Result<()> {
    let source = cli.config_source()?;
    let (session, events) = cli.session(source.load()?)?;
    seekpanel::ui::run_panel(session, events, source).await
}

async fn ask(cli: &Cli, prompt: &str) -> Result<()> {
    let config = cli.load_config()?;
    let placeholder = config.thinking_placeholder.clone();
    let (session, mut events) = cli.session(config)?;

    // Every update carries the whole answer so far; print only what is new
    let printer = tokio::spawn(async move {
        let mut shown = String::new();
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            let PanelEvent::ChatResponse { text } = event else {
                continue;
            };
            if placeholder.as_deref() == Some(text.as_str()) {
                if shown.is_empty() {
                    eprint!("{}\r", text);
                }
                continue;
            }
            // Error reports replace the answer instead of extending it
            if let Some(rest) = text.strip_prefix(shown.as_str()) {
                let _ = write!(stdout, "{}", rest);
                let _ = stdout.flush();
                shown = text;
            }
        }
        !shown.is_empty()
    });

    let outcome = session
        .handle_command(PanelCommand::Send {
            text: prompt.to_string(),
        })
        .await;
    drop(session);
    if printer.await? {
        println!();
    }

    match outcome {
        Some(SubmissionOutcome::Completed { .. }) => Ok(()),
        Some(SubmissionOutcome::Failed { error }) => bail!("request failed: {}", error),
        None => bail!("prompt is empty"),
    }
}

fn show_config(cli: &Cli, write: bool) -> Result<()> {
    let config = cli.load_config()?;
    print!("{}", toml::to_string_pretty(&config)?);
    if write {
        let path = cli.config_source()?.path;
        config.save_to(&path)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

async fn list_models(cli: &Cli, remote: bool) -> Result<()> {
    let config = cli.load_config()?;

    let models = if remote {
        OllamaClient::new()?
            .list_models(&config.server_url)
            .await
            .with_context(|| format!("Failed to list models on {}", config.server_url))?
    } else {
        config.models.clone()
    };

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }
    let selected = cli.model.as_deref().unwrap_or(config.default_model());
    for model in models {
        let marker = if model.value == selected { "*" } else { " " };
        println!("{} {:<24} {}", marker, model.value, model.name);
    }
    Ok(())
}
