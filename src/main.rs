use std::io::Write;

use agent_stream::client::ChatClient;
use agent_stream::config::{load_config, AppConfig};
use agent_stream::error::ClientError;
use agent_stream::identity::{ensure_user_id, FileStore};
use agent_stream::message::{AssembledMessage, MessageObserver};
use agent_stream::observability::init_tracing;
use agent_stream::session::SessionOutcome;
use tokio::io::{AsyncBufReadExt, BufReader};

const CONFIG_ENV: &str = "AGENT_CHAT_CONFIG";

fn main() {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yaml".to_string());
    let config = load_config(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(err) = runtime.block_on(run(config)) {
        eprintln!("{}", err.diagnostic());
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), ClientError> {
    let store = FileStore::new(&config.identity.store_path);
    let user_id = ensure_user_id(&store)?;
    tracing::debug!(store = %store.path().display(), "user identity loaded");
    let client = ChatClient::new(config)?;
    let mut conversation = client.conversation(&user_id);

    let canceller = conversation.canceller();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !canceller.cancel() {
                println!();
                std::process::exit(130);
            }
        }
    });

    println!(
        "agent-chat: {} (session {}). Commands: /agents /models /health exit",
        conversation.agent_id(),
        conversation.session_id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| ClientError::Internal(format!("stdin: {err}")))?
        else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/agents" => print_agents(&client).await,
            "/models" => print_models(&client).await,
            "/health" => print_health(&client).await,
            text => {
                let mut renderer = StdoutRenderer::default();
                match client.send_stream(&conversation, text, &mut renderer).await {
                    Ok(exchange) => {
                        if exchange.outcome == SessionOutcome::Cancelled {
                            println!("[cancelled]");
                        }
                        conversation.record(exchange.into_messages());
                    }
                    Err(err) => eprintln!("{}", err.diagnostic()),
                }
            }
        }
    }
    Ok(())
}

async fn print_agents(client: &ChatClient) {
    match client.agents().await {
        Ok(catalog) => {
            for id in &catalog.configured_agents {
                let state = if catalog.is_available(id) {
                    "available"
                } else {
                    "unavailable"
                };
                println!("  {id:<16} {:<28} {state}", catalog.display_name(id));
            }
        }
        Err(err) => eprintln!("{}", err.diagnostic()),
    }
}

async fn print_models(client: &ChatClient) {
    match client.models().await {
        Ok(catalog) => {
            for provider in catalog.providers() {
                println!("  {provider}: {}", catalog.models_for(provider).join(", "));
            }
            let chat = &client.config().chat;
            if let (Some(provider), Some(model)) = (&chat.provider_name, &chat.model_name) {
                let state = if catalog.contains(provider, model) {
                    "available"
                } else {
                    "not offered by the service"
                };
                println!("  selected {provider}/{model}: {state}");
            }
        }
        Err(err) => eprintln!("{}", err.diagnostic()),
    }
}

async fn print_health(client: &ChatClient) {
    match client.health().await {
        Ok(status) => println!("  {:?}: {}", status.status, status.message),
        Err(err) => eprintln!("{}", err.diagnostic()),
    }
}

/// Prints tokens as they arrive. Content that is rewritten rather than
/// extended (error replacement) is printed again in full on a new line.
#[derive(Default)]
struct StdoutRenderer {
    printed: String,
}

impl MessageObserver for StdoutRenderer {
    fn on_update(&mut self, message: &AssembledMessage) {
        let content = message.content();
        let mut out = std::io::stdout().lock();
        match content.strip_prefix(self.printed.as_str()) {
            Some(suffix) => {
                let _ = out.write_all(suffix.as_bytes());
            }
            None => {
                let _ = write!(out, "\n{content}");
            }
        }
        if !message.is_streaming() {
            let _ = writeln!(out);
        }
        let _ = out.flush();
        self.printed.clear();
        self.printed.push_str(content);
    }
}
