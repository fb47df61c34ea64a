//! parla CLI: text-to-speech session server and client.
//!
//! ```text
//! parla serve [--port 2004] [--host 127.0.0.1] [--no-audio]
//! parla say "hello world" [--voice ID] [--save speech.mp3]
//! parla preview [--voice ID]
//! parla voices / phrases
//! parla convert "hello world" [--voice ID] [--server http://localhost:2004]
//! parla stop / status [--server ...]
//! parla download [--out speech.mp3] [--server ...]
//! ```
//!
//! Provider options (`--api-key`, `--base-url`, `--model`, `--output-format`)
//! apply to `serve`, `say` and `preview`. The key falls back to
//! `ELEVENLABS_API_KEY`, read from the environment or a `.env` file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use parla_lib::parla_core::audio::OutputFormat;
use parla_lib::parla_core::types::{
    API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL_ID, SessionConfig,
};
use parla_lib::playback::{AudioOutput, RodioOutput, SilentOutput};
use parla_lib::provider::ElevenLabsClient;
use parla_lib::session::SpeechSession;

const DEFAULT_SERVER: &str = "http://localhost:2004";

/// Log targets are crate names: this binary logs as `parla`.
const DEFAULT_LOG_FILTER: &str = "parla=info,parla_lib=info";

/// parla: text-to-speech with playback
#[derive(Parser)]
#[command(name = "parla", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ProviderArgs {
    /// ElevenLabs API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,
    /// Provider base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Synthesis model
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model: String,
    /// Output encoding, e.g. mp3_44100_128
    #[arg(long, default_value = "mp3_44100_128", value_parser = parse_output_format)]
    output_format: OutputFormat,
    /// Skip the audio device (headless hosts)
    #[arg(long)]
    no_audio: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP session server
    Serve {
        /// Listen port
        #[arg(long, default_value = "2004")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Convert text and play it locally
    Say {
        /// Text to speak
        text: String,
        /// Voice id (defaults to the first voice)
        #[arg(long)]
        voice: Option<String>,
        /// Also save the audio to this file
        #[arg(long)]
        save: Option<PathBuf>,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Play the preview sentence with a voice
    Preview {
        #[arg(long)]
        voice: Option<String>,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// List available voices
    Voices,
    /// List example phrases
    Phrases,
    /// Ask a running server to convert and play text
    Convert {
        text: String,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Stop playback on a running server
    Stop {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get server session status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Save the server's current audio
    Download {
        #[arg(long, default_value = "speech.mp3")]
        out: PathBuf,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Serve {
            port,
            host,
            provider,
        } => {
            let session = build_session(provider)?;
            let app = parla_lib::server::router(session);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| format!("failed to bind {addr}: {e}"))?;
            tracing::info!("parla listening on {addr}");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .map_err(|e| format!("server error: {e}"))
        }

        Command::Say {
            text,
            voice,
            save,
            provider,
        } => {
            let session = build_session(provider)?;
            let voice = voice.unwrap_or_else(|| session.config().default_voice_id());
            session
                .convert_and_play(&text, &voice)
                .await
                .map_err(|e| e.to_string())?;
            if let Some(path) = save {
                let path = session
                    .download(Some(&path))
                    .await
                    .map_err(|e| e.to_string())?;
                println!("saved {}", path.display());
            }
            wait_for_playback(&session).await;
            Ok(())
        }

        Command::Preview { voice, provider } => {
            let session = build_session(provider)?;
            let voice = voice.unwrap_or_else(|| session.config().default_voice_id());
            session
                .preview_voice(&voice)
                .await
                .map_err(|e| e.to_string())?;
            wait_for_playback(&session).await;
            Ok(())
        }

        Command::Voices => {
            for voice in SessionConfig::default().voices {
                println!("{}  {}", voice.id, voice.name);
            }
            Ok(())
        }

        Command::Phrases => {
            for phrase in SessionConfig::default().example_phrases {
                println!("{phrase}");
            }
            Ok(())
        }

        Command::Convert {
            text,
            voice,
            server,
        } => {
            let mut body = serde_json::json!({ "text": text });
            if let Some(voice) = voice {
                body["voice_id"] = serde_json::Value::String(voice);
            }
            let resp = reqwest::Client::new()
                .post(format!("{server}/convert"))
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            print_response(resp).await
        }

        Command::Stop { server } => {
            let resp = reqwest::Client::new()
                .post(format!("{server}/stop"))
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            print_response(resp).await
        }

        Command::Status { server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/status"))
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            print_response(resp).await
        }

        Command::Download { out, server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/download"))
                .send()
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            if !resp.status().is_success() {
                return print_response(resp).await;
            }
            let audio = resp
                .bytes()
                .await
                .map_err(|e| format!("download failed: {e}"))?;
            tokio::fs::write(&out, &audio)
                .await
                .map_err(|e| format!("failed to write {}: {e}", out.display()))?;
            println!("saved {} bytes to {}", audio.len(), out.display());
            Ok(())
        }
    }
}

fn build_session(provider: ProviderArgs) -> Result<SpeechSession, String> {
    let output: Arc<dyn AudioOutput> = if provider.no_audio {
        Arc::new(SilentOutput)
    } else {
        Arc::new(RodioOutput::new().map_err(|e| e.to_string())?)
    };

    let config = SessionConfig {
        api_key: provider.api_key,
        base_url: provider.base_url,
        model_id: provider.model,
        output_format: provider.output_format,
        ..Default::default()
    };
    if config.credential().is_none() {
        tracing::warn!("no API key configured; set {API_KEY_ENV} or pass --api-key");
    }

    let client = ElevenLabsClient::new(config.base_url.clone());
    Ok(SpeechSession::new(config, Arc::new(client), output))
}

/// Block until playback ends on its own or Ctrl-C stops it.
async fn wait_for_playback(session: &SpeechSession) {
    let mut status = session.subscribe();
    tokio::select! {
        _ = status.wait_for(|s| !s.is_playing) => {}
        _ = tokio::signal::ctrl_c() => {
            session.stop();
        }
    }
}

async fn print_response(resp: reqwest::Response) -> Result<(), String> {
    let ok = resp.status().is_success();
    let body = resp.text().await.unwrap_or_default();
    println!("{body}");
    if ok {
        Ok(())
    } else {
        Err("server reported an error".into())
    }
}

fn parse_output_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}
