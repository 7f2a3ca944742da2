//! Terminal client for a Gemini Live session.
//!
//! Lines typed on stdin are sent as user turns. Two commands send media:
//! `/image <path>` sends a JPEG file as one frame and `/audio <path>` streams a
//! raw 16 kHz mono PCM16 file in 100 ms chunks. Model text is printed to stdout,
//! model audio is appended to `--audio-out` when given.

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use gemini_realtime::{Event, EventKind, LiveClient, ResponseModality, ToolResult};
use gemini_live::config::Config;
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{error, info, warn};

/// 100 ms of 16 kHz mono PCM16.
const AUDIO_CHUNK_BYTES: usize = 3200;

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a Gemini Live session from the terminal")]
struct Args {
    /// Model to use, overriding LIVE_MODEL.
    #[arg(long)]
    model: Option<String>,
    /// File that model audio (raw PCM) is appended to, overriding AUDIO_OUT.
    #[arg(long)]
    audio_out: Option<PathBuf>,
    /// Ask for text responses instead of audio.
    #[arg(long)]
    text_only: bool,
}

/// Listens for the `Ctrl+C` signal to end the session.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Disconnecting...");
}

/// Prints model output and answers tool calls as events arrive.
fn register_listeners(client: &LiveClient, audio_tx: Option<mpsc::UnboundedSender<Vec<u8>>>) {
    client.on(EventKind::Content, |event| {
        if let Event::Content(content) = event {
            for text in content.parts().iter().filter_map(|part| part.text()) {
                print!("{text}");
            }
            let _ = std::io::stdout().flush();
        }
    });
    client.on(EventKind::TurnComplete, |_| println!());
    client.on(EventKind::Interrupted, |_| println!("\n[interrupted]"));
    if let Some(audio_tx) = audio_tx {
        client.on(EventKind::Audio, move |event| {
            if let Event::Audio(pcm) = event {
                let _ = audio_tx.send(pcm.clone());
            }
        });
    }

    let responder = client.clone();
    client.on(EventKind::ToolCall, move |event| {
        let Event::ToolCall(call) = event else {
            return;
        };
        for function in &call.function_calls {
            let Some(id) = function.id.clone() else {
                warn!(name = %function.name, "Tool call without an id; cannot respond");
                continue;
            };
            info!(name = %function.name, %id, "Declining tool call");
            let result = ToolResult::error(id, "no tools are available in this client");
            if let Err(e) = responder.send_tool_response(result) {
                warn!(error = %e, "Failed to build tool response");
            }
        }
    });
    client.on(EventKind::ToolCallCancellation, |event| {
        if let Event::ToolCallCancellation(cancellation) = event {
            info!(ids = ?cancellation.ids, "Tool calls cancelled");
        }
    });
    client.on(EventKind::Disconnected, |event| {
        if let Event::Disconnected {
            code,
            reason,
            reconnect_in,
        } = event
        {
            warn!(code, %reason, ?reconnect_in, "Disconnected");
        }
    });
    client.on(EventKind::ConnectionError, |event| {
        if let Event::ConnectionError(e) = event {
            error!(error = %e, "Connection error");
        }
    });
}

/// Appends model audio to `path` until the sender side is dropped.
async fn write_audio(
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    while let Some(pcm) = rx.recv().await {
        file.write_all(&pcm).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn send_image(client: &LiveClient, path: &Path) -> anyhow::Result<()> {
    let jpeg = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data = base64::engine::general_purpose::STANDARD.encode(jpeg);
    if !client.send_image(&data) {
        warn!(path = %path.display(), "Image was not sent");
    }
    Ok(())
}

async fn send_audio(client: &LiveClient, path: &Path) -> anyhow::Result<()> {
    let pcm = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut sent = 0;
    for chunk in pcm.chunks(AUDIO_CHUNK_BYTES) {
        if client.send_audio(&base64::engine::general_purpose::STANDARD.encode(chunk)) {
            sent += 1;
        }
    }
    info!(path = %path.display(), chunks = sent, "Streamed audio file");
    Ok(())
}

async fn handle_line(client: &LiveClient, line: &str) -> anyhow::Result<()> {
    if let Some(path) = line.strip_prefix("/image ") {
        send_image(client, Path::new(path.trim())).await
    } else if let Some(path) = line.strip_prefix("/audio ") {
        send_audio(client, Path::new(path.trim())).await
    } else {
        if !client.send_text(line, true) {
            warn!("Not connected; message dropped");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(audio_out) = args.audio_out {
        config.audio_out = Some(audio_out);
    }
    if args.text_only {
        config.response_modality = ResponseModality::Text;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        client = %config.client_name,
        model = %config.model,
        modality = ?config.response_modality,
        "Configuration loaded. Connecting..."
    );

    // --- 3. Wire up the client ---
    let client = LiveClient::new(config.session());
    let (audio_tx, audio_task) = match config.audio_out.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(tokio::spawn(write_audio(path, rx))))
        }
        None => (None, None),
    };
    register_listeners(&client, audio_tx);

    // --- 4. Connect and relay stdin ---
    client
        .connect()
        .await
        .context("Failed to connect to the live service")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(e) = handle_line(&client, line).await {
                    warn!(error = %e, "Command failed");
                }
            }
        }
    }

    // --- 5. Tear down ---
    client.disconnect();
    // Listeners hold the audio sender and a client handle; drop them so both can finish.
    client.events().clear();
    if let Some(task) = audio_task {
        task.await??;
    }
    info!("Session ended.");
    Ok(())
}
