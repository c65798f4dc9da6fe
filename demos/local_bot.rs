// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! # Local Chatbot
//!
//! Runs the full bot (OpenAI, Cartesia, Soniox, animated avatar) against the
//! in-process transport and lets you talk to it by typing. Each line you
//! enter is treated as a finished user utterance; the bot's reply text is
//! printed as it streams and synthesized audio is counted.
//!
//! ```text
//! stdin --> [transport in] -> rtvi -> stt -> user ctx -> llm -> functions
//!               -> tts -> avatar -> [transport out] -> assistant ctx
//!                                         |
//!                                      stdout
//! ```
//!
//! ## Setup
//!
//! 1. Put `OPENAI_API_KEY`, `CARTESIA_API_KEY` and `SONIOX_API_KEY` in `.env`
//! 2. Run: `cargo run --example local_bot -- --url https://example.daily.co/room`
//! 3. Type a message and press enter. An empty line or EOF ends the session.

use std::io::Write;

use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use simple_chatbot::bot::{build_bot, function_schema, BotProviders};
use simple_chatbot::config::BotConfig;
use simple_chatbot::frames::{FrameEnum, TranscriptionFrame};
use simple_chatbot::processors::function_calls::FunctionOptions;
use simple_chatbot::session::SessionRegistry;
use simple_chatbot::transports::{OutboundMessage, Transport, TransportInput, TransportParams};

#[derive(Parser, Debug)]
#[command(name = "local_bot", about = "Talk to the simple chatbot from a terminal")]
struct Args {
    /// Room the session is associated with.
    #[arg(short = 'u', long = "url", env = "DAILY_SAMPLE_ROOM_URL")]
    url: Option<String>,

    /// Token for the room.
    #[arg(short = 't', long = "token", env = "DAILY_SAMPLE_ROOM_TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,simple_chatbot=debug")),
        )
        .init();

    let args = Args::parse();
    let session_id = args.url.clone().unwrap_or_else(|| "local".to_string());
    tracing::info!(room = %session_id, has_token = args.token.is_some(), "starting local session");

    let config = BotConfig::from_env()?;
    let providers = BotProviders::from_config(&config)?.with_function(
        function_schema(
            "get_current_weather",
            "Get the current weather",
            json!({
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA",
                },
                "format": {
                    "type": "string",
                    "enum": ["celsius", "fahrenheit"],
                    "description": "The temperature unit to use. Infer this from the user's location.",
                },
            }),
            &["location", "format"],
        ),
        |params| async move {
            tracing::info!(arguments = %params.arguments, "weather requested");
            Ok::<_, String>(json!({"conditions": "nice", "temperature": "75"}))
        },
        FunctionOptions {
            filler_text: Some("Let me check on that.".to_string()),
            cancel_on_interruption: true,
        },
    );

    let (mut transport, mut io) = Transport::new(TransportParams::default());
    let bot = build_bot(&config, providers, &mut transport)?;
    let handle = bot.handle();

    let sessions = SessionRegistry::new();
    sessions.create(session_id.clone(), handle.clone())?;
    let running = tokio::spawn(bot.run());

    io.send(TransportInput::participant_joined("local-user"));
    io.send(TransportInput::Message(json!({
        "label": "rtvi-ai",
        "type": "client-ready",
        "id": "local-1",
        "data": {"version": "0.3.0"},
    })));

    let printer = tokio::spawn(async move {
        let mut audio_bytes = 0usize;
        while let Some(message) = io.recv().await {
            match message {
                OutboundMessage::Audio(audio) => audio_bytes += audio.audio.len(),
                OutboundMessage::Message(message) => match message["type"].as_str() {
                    Some("bot-llm-text") => {
                        print!("{}", message["data"]["text"].as_str().unwrap_or_default());
                        let _ = std::io::stdout().flush();
                    }
                    Some("bot-llm-stopped") => println!(),
                    Some("bot-stopped-speaking") => {
                        println!("[{audio_bytes} bytes of audio]");
                        audio_bytes = 0;
                    }
                    _ => {}
                },
                OutboundMessage::Image(_) => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            break;
        }
        handle.queue_frame(FrameEnum::Transcription(TranscriptionFrame::new(
            text,
            "local-user",
            format!("{:?}", std::time::SystemTime::now()),
        )));
    }

    sessions.remove(&session_id)?;
    let state = running.await?;
    printer.abort();
    tracing::info!(%state, "session finished");
    Ok(())
}
