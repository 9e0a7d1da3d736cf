//! `sonogram`: recognizer client for the Sonogram voice-coding server.
//!
//! Connects, asks the server for its command grammar, then forwards the
//! semantics of every recognized utterance until Ctrl-C or end of input.
//! The bundled engine recognizes typed utterances read from stdin.

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use settings::{default_settings_path, load_settings, ClientSettings};
use sonogram_core::session::ModePolicy;
use sonogram_core::{
    EngineHandle, Endpoint, Format, RetryPolicy, Session, SessionConfig, TextEngine,
    UtteranceSource,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sonogram")]
#[command(author, version, about = "Speech recognition client for a Sonogram server", long_about = None)]
struct Cli {
    /// Verbose logging and indented outbound messages
    #[arg(long)]
    debug: bool,

    /// Read utterances from stdin, one per line, instead of live audio
    #[arg(long)]
    read: bool,

    /// Server port
    #[arg(long, env = "SONOGRAM_PORT")]
    port: Option<u16>,

    /// Grammar language to request [default: default]
    #[arg(long, value_name = "NAME")]
    grammar: Option<String>,

    /// Server host [default: localhost]
    #[arg(long)]
    host: Option<String>,

    /// Connect with wss:// instead of ws://
    #[arg(long)]
    tls: bool,

    /// Talk line-framed JSON over a Unix socket or named pipe instead of WebSocket
    #[arg(long, value_name = "PATH")]
    pipe: Option<PathBuf>,

    /// Announce the recognizer role before requesting the grammar
    #[arg(long)]
    identify: bool,

    /// Settings file [default: platform data dir]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to wait for the grammar reply
    #[arg(long, value_name = "SECS")]
    grammar_timeout: Option<u64>,

    /// Connection attempts before giving up
    #[arg(long, value_name = "N")]
    connect_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "sonogram=debug" } else { "sonogram=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    let config = session_config(&cli, &settings)?;
    let endpoint = config.endpoint.clone();
    info!(%endpoint, lang = %config.lang, "Sonogram starting");

    let session = Session::new(config, EngineHandle::new(TextEngine::new()));
    let input = if cli.read {
        UtteranceSource::stdin().context("cannot read stdin")?
    } else if session.supports_streaming() {
        UtteranceSource::Live
    } else {
        warn!("engine has no live audio input; reading utterances from stdin");
        UtteranceSource::stdin().context("cannot read stdin")?
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    session
        .run(input, shutdown)
        .await
        .with_context(|| format!("session with {endpoint} ended with an error"))
}

/// Merge flags, environment and the settings file. Flags win.
fn session_config(cli: &Cli, settings: &ClientSettings) -> anyhow::Result<SessionConfig> {
    let endpoint = match cli.pipe.clone().or_else(|| settings.pipe.clone()) {
        Some(path) => {
            if cli.port.is_some() || cli.host.is_some() || cli.tls {
                warn!("--pipe given; ignoring host, port and TLS options");
            }
            Endpoint::Pipe(path)
        }
        None => {
            let port = cli
                .port
                .or(settings.port)
                .context("no server port configured (use --port or SONOGRAM_PORT)")?;
            if port == 0 {
                bail!("port must be between 1 and 65535");
            }
            let host = cli.host.as_deref().unwrap_or(&settings.host);
            Endpoint::websocket(host, port, cli.tls || settings.tls)
        }
    };

    let timeout_secs = cli
        .grammar_timeout
        .unwrap_or(settings.grammar_timeout_secs)
        .max(1);
    let attempts = cli
        .connect_retries
        .unwrap_or(settings.connect_retries)
        .max(1);

    Ok(SessionConfig {
        endpoint,
        lang: cli
            .grammar
            .clone()
            .unwrap_or_else(|| settings.grammar.clone()),
        identify: cli.identify || settings.identify,
        format: if cli.debug {
            Format::Pretty
        } else {
            Format::Compact
        },
        grammar_timeout: Duration::from_secs(timeout_secs),
        connect_retry: RetryPolicy::with_attempts(attempts),
        mode_policy: ModePolicy {
            stop_phrase: settings.stop_phrase.clone(),
            dictation_action: settings.dictation_action.clone(),
        },
        ..SessionConfig::default()
    })
}
