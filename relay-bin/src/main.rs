use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use relay_core::{
    config::{Config, ProviderCfg, Providers},
    model::Message,
    provider_factory::ProviderRegistry,
    stream::ProviderEvent,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "relay CLI smoke tool", long_about = None)]
struct Cli {
    /// JSON or TOML config file. Without one, OPENAI_API_KEY and XAI_API_KEY are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Provider name (openai, xai, null). Defaults to the registry default.
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Model id override for the configured providers.
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion request
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Stream a chat completion (prints deltas live)
    Stream {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
}

fn env_config() -> Config {
    let provider = |env: &str| ProviderCfg {
        api_key_env: env.into(),
        base_url: None,
        system_prompt_file: None,
        model: None,
        organization: None,
    };
    Config {
        providers: Providers {
            openai: Some(provider("OPENAI_API_KEY")),
            xai: Some(provider("XAI_API_KEY")),
        },
        ..Config::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => env_config(),
    };
    if let Some(model) = &cli.model {
        for pc in [&mut cfg.providers.openai, &mut cfg.providers.xai]
            .into_iter()
            .flatten()
        {
            pc.model = Some(model.clone());
        }
    }

    let reg = ProviderRegistry::from_config(&cfg)?;
    let provider = match &cli.provider {
        Some(name) => reg.chat(name).ok_or_else(|| {
            anyhow::anyhow!("provider {name} not available (registered: {:?})", reg.names())
        })?,
        None => reg.default_chat(),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Chat { message } => {
            let resp = provider
                .send_messages(vec![Message::user(message)], vec![], cancel)
                .await?;
            println!("{} -> {}", provider.name(), resp.content);
            eprintln!(
                "[finish: {} tokens: {}/{}]",
                resp.finish_reason.as_str(),
                resp.usage.input_tokens,
                resp.usage.output_tokens
            );
        }
        Commands::Stream { message } => {
            let mut stream = provider.stream_response(vec![Message::user(message)], vec![], cancel);
            let mut saw_delta = false;
            while let Some(ev) = stream.next().await {
                match ev {
                    ProviderEvent::ContentDelta(txt) => {
                        saw_delta = true;
                        print!("{txt}");
                        io::stdout().flush().ok();
                    }
                    ProviderEvent::ToolCallDelta { .. } => {}
                    ProviderEvent::Complete(resp) => {
                        if saw_delta {
                            println!();
                        }
                        for call in &resp.tool_calls {
                            eprintln!("[tool call {}: {} {}]", call.id, call.name, call.input);
                        }
                        eprintln!(
                            "[finish: {} tokens: {}/{}]",
                            resp.finish_reason.as_str(),
                            resp.usage.input_tokens,
                            resp.usage.output_tokens
                        );
                    }
                    ProviderEvent::Error(err) => {
                        if saw_delta {
                            println!();
                        }
                        anyhow::bail!(err);
                    }
                }
            }
        }
    }

    Ok(())
}
