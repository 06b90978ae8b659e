//! Callwave terminal host.
//!
//! ```text
//! callwave            place a call (same as `callwave call`)
//! callwave devices    list audio devices
//! callwave init       write a settings file with defaults
//! ```
//!
//! During a call, typed lines are sent as text turns and an empty line hangs
//! up. Session events arrive on tokio broadcast channels; the call itself
//! runs on the session's own threads.

mod console;
mod settings;

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use callwave_core::{
    list_input_devices, list_output_devices, CallSession, CallState, CpalInputDevice,
    CpalOutputDevice, HttpSentiment, LiveConnector, SentimentService, SessionServices,
};
use console::StatusView;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{info, warn};

const STATUS_REFRESH: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("callwave=info,callwave_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    settings.apply_overrides(|name| std::env::var(name).ok());

    let command = std::env::args().nth(1);
    match command.as_deref() {
        None | Some("call") => run_call(settings).await,
        Some("devices") => {
            print_devices();
            Ok(())
        }
        Some("init") => {
            save_settings(&settings_path, &settings)
                .with_context(|| format!("writing {}", settings_path.display()))?;
            println!("settings written to {}", settings_path.display());
            Ok(())
        }
        Some("help" | "-h" | "--help") => {
            println!("usage: callwave [call | devices | init]");
            Ok(())
        }
        Some(other) => bail!("unknown command `{other}` (try `callwave help`)"),
    }
}

fn print_devices() {
    println!("Input devices:");
    for device in list_input_devices() {
        println!("{}", console::device_line(&device));
    }
    println!("Output devices:");
    for device in list_output_devices() {
        println!("{}", console::device_line(&device));
    }
}

fn build_session(settings: &AppSettings) -> anyhow::Result<CallSession> {
    if settings.api_key.is_none() {
        bail!("no API key: set CALLWAVE_API_KEY or `apiKey` in the settings file");
    }

    let config = settings.session_config();
    let connector = LiveConnector::new(settings.live_config(config.capture.sample_rate));

    let sentiment: Option<Arc<dyn SentimentService>> = match settings.sentiment_config() {
        Some(cfg) => match HttpSentiment::new(cfg) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                warn!("sentiment disabled: {e}");
                None
            }
        },
        None => None,
    };

    let session = CallSession::new(
        config,
        SessionServices {
            connector: Arc::new(connector),
            input: Arc::new(CpalInputDevice::new(settings.preferred_input_device.clone())),
            output: Arc::new(CpalOutputDevice::new(settings.preferred_output_device.clone())),
            sentiment,
        },
    )?;
    Ok(session)
}

async fn run_call(settings: AppSettings) -> anyhow::Result<()> {
    let session = Arc::new(build_session(&settings)?);
    let mut state_rx = session.subscribe_state();
    let mut transcript_rx = session.subscribe_transcripts();
    let mut sentiment_rx = session.subscribe_sentiment();

    let call_id = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.start_session()).await??
    };
    info!(call_id, "dialing");
    println!("Calling... type a message and press Enter to send it, or press Enter alone to hang up.");

    // Blocking stdin reader; detached so it never holds up runtime shutdown.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::Builder::new()
        .name("callwave-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    let mut ticker = tokio::time::interval(STATUS_REFRESH);
    loop {
        tokio::select! {
            event = state_rx.recv() => match event {
                Ok(event) => {
                    clear_status();
                    match event.detail.as_deref() {
                        Some(detail) => println!("-- {} ({detail})", event.state),
                        None => println!("-- {}", event.state),
                    }
                    if event.state == CallState::Idle {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            event = transcript_rx.recv() => {
                if let Ok(event) = event {
                    clear_status();
                    println!("{}", console::transcript_line(event.speaker, &event.text));
                }
            }
            event = sentiment_rx.recv() => {
                if let Ok(event) = event {
                    info!(seq = event.seq, label = %event.label, "sentiment");
                }
            }
            line = line_rx.recv() => {
                let session = Arc::clone(&session);
                match line {
                    Some(text) if !text.trim().is_empty() => {
                        let sent = tokio::task::spawn_blocking(move || session.send_text(text)).await?;
                        if let Err(e) = sent {
                            warn!("message not sent: {e}");
                        }
                    }
                    _ => {
                        tokio::task::spawn_blocking(move || session.end_session()).await?;
                    }
                }
            }
            _ = ticker.tick() => {
                let language = session.detected_language();
                let line = console::status_line(&StatusView {
                    state: session.state(),
                    input: session.input_volume(),
                    output: session.output_volume(),
                    language: language.as_deref(),
                    sentiment: session.current_sentiment(),
                });
                print!("\r{line}");
                let _ = std::io::stdout().flush();
            }
        }
    }

    let diagnostics = session.diagnostics_snapshot();
    info!(
        frames_sent = diagnostics.frames_sent,
        fragments_played = diagnostics.fragments_played,
        fragments_dropped = diagnostics.fragments_dropped,
        interruptions = diagnostics.interruptions,
        "call finished"
    );
    let transcript = session.transcript();
    if !transcript.is_empty() {
        println!("\nTranscript:\n{transcript}");
    }
    Ok(())
}

fn clear_status() {
    print!("\r\x1b[2K");
}
