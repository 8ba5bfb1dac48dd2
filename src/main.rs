use anyhow::Context;
use clap::{Parser, ValueEnum};
use lecture_agent::{
    audio_sink::{AudioSink, SimulatedSink},
    config::{load_config, SessionConfig},
    interaction::{InteractionBuilder, InteractionEvent},
    language::LanguageConfig,
    llm::{AssistantClient, MessageTemplates},
    transcript::InMemoryTranscript,
    tts::OpenAiTts,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AudioBackend {
    /// Default output device
    Cpal,
    /// No sound, playback takes as long as the audio would
    Simulated,
}

#[derive(Parser)]
#[command(name = "lecture-agent")]
#[command(about = "Spoken lecture agent with raise-hand, quiz and interjection handling")]
#[command(long_about = "
Streams a lecture from an OpenAI assistant, speaks it sentence by sentence and
takes turns with the listener. Type replies on stdin.

COMMANDS (stdin):
  /hand    raise your hand, the lecturer asks for your question at the next pause
  /reset   stop everything and return to idle
  /start   start again after a reset
  /quit    exit

EXAMPLES:
  lecture-agent --topic \"the water cycle\"
  lecture-agent --language hu --session session.json --audio simulated
")]
struct Args {
    /// Built-in language code (en, hu) or path to a language JSON file
    #[arg(long, default_value = "en")]
    language: String,

    /// Session settings JSON file
    #[arg(long)]
    session: Option<PathBuf>,

    /// Audio output backend
    #[arg(long, value_enum, default_value_t = AudioBackend::Cpal)]
    audio: AudioBackend,

    /// Topic for the opening turn. Without it the agent waits for /start.
    #[arg(long)]
    topic: Option<String>,
}

fn load_language(name_or_path: &str) -> anyhow::Result<LanguageConfig> {
    if let Some(language) = LanguageConfig::builtin(name_or_path) {
        return Ok(language);
    }
    LanguageConfig::from_json_file(name_or_path)
        .with_context(|| format!("'{}' is neither a built-in language nor a readable file", name_or_path))
}

fn make_sink(backend: AudioBackend) -> anyhow::Result<Arc<dyn AudioSink>> {
    match backend {
        AudioBackend::Simulated => Ok(Arc::new(SimulatedSink::new())),
        #[cfg(feature = "cpal-sink")]
        AudioBackend::Cpal => Ok(Arc::new(
            lecture_agent::audio_sink::CpalSink::new().context("Audio sink failed")?,
        )),
        #[cfg(not(feature = "cpal-sink"))]
        AudioBackend::Cpal => {
            anyhow::bail!("built without the cpal-sink feature, use --audio simulated")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("🚀 Initializing lecture-agent");

    let language = load_language(&args.language)?;
    let session = match &args.session {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    let api_config = load_config()?;
    let transcript = Arc::new(InMemoryTranscript::new());
    let builder = InteractionBuilder::new(session.clone(), language.clone());

    let engine = Arc::new(AssistantClient::new(&api_config, builder.dialogue_sender())?);
    log::info!("🤖 Dialogue engine initialized");
    let tts = Arc::new(OpenAiTts::from_config(&api_config, &session.speech)?);
    log::info!("🔊 TTS initialized ({} / {})", session.speech.model, session.speech.voice_id);

    let (machine, handle) = builder
        .engine(engine)
        .synthesizer(tts)
        .lecture_sink(make_sink(args.audio)?)
        .interjection_sink(make_sink(args.audio)?)
        .transcript(transcript.clone())
        .build()?;

    let mut events = handle.subscribe();
    let machine_task = tokio::spawn(machine.run());

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(InteractionEvent::CaptureArmed) => println!("🎤 Your turn:"),
                Ok(InteractionEvent::SynthesisError { lane, index, message }) => {
                    println!("⚠️  [{}] sentence #{} skipped: {}", lane, index, message)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let opening = args
        .topic
        .as_deref()
        .map(|topic| MessageTemplates::opening(topic, &language.display_name));
    if opening.is_some() {
        handle.start(opening.clone());
    }

    println!("📚 Lecture agent ready ({})", language.display_name);
    println!("   /hand to raise your hand, /reset, /start, /quit");
    println!("   Press Ctrl+C to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/hand" => handle.raise_hand(),
                    "/reset" => handle.hard_reset(),
                    "/start" => handle.start(opening.clone()),
                    text => handle.user_utterance(text),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = machine_task.await {
        log::error!("Interaction task failed: {}", e);
    }

    if !transcript.is_empty() {
        println!("\n📝 Transcript\n{}", transcript.formatted());
    }
    println!("👋 Goodbye!");
    Ok(())
}
