//! yougood: arm a fake incoming call from the terminal.
//!
//! Reads one command per line from stdin and prints call notifications as they
//! arrive. `help` lists the commands.

use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yougood_core::{
    AppConfig, CallConfig, CallHandle, CallNotification, CallService, CallServiceParts, Intensity,
    OpenAiChatGateway, PersonaRegistry, PresetStore, ReplyGateway, ReplyService, Role,
    TIMER_PRESETS,
};
use yougood_voice::{
    create_best_stt, create_best_tts, AudioConfig, AudioOutput, CpalMicrophone, NoopRinger,
    PlaybackSink, RecordingCycle, Ringer, RodioPlayback, SilentPlayback, ToneRinger, VoiceCatalog,
    RINGTONE_IDS,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Set to any value to skip the microphone and type every caller line.
const TYPED_ONLY_ENV: &str = "YOUGOOD_TYPED_ONLY";

#[tokio::main]
async fn main() -> CliResult<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[yougood] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load()?;
    let personas = Arc::new(PersonaRegistry::load(config.persona_file.as_deref().map(Path::new))?);
    let presets = PresetStore::open_path(Path::new(&config.storage_path).join("saved_plans"))?;

    let gateway = OpenAiChatGateway::from_env().map(|g| Arc::new(g) as Arc<dyn ReplyGateway>);
    let replies = Arc::new(ReplyService::new(gateway));

    let (playback, ringer) = match AudioOutput::open() {
        Ok(output) => (
            Arc::new(RodioPlayback::new(output.clone())) as Arc<dyn PlaybackSink>,
            Arc::new(ToneRinger::new(output)) as Arc<dyn Ringer>,
        ),
        Err(e) => {
            tracing::warn!("no audio output ({}), running silent", e);
            (
                Arc::new(SilentPlayback) as Arc<dyn PlaybackSink>,
                Arc::new(NoopRinger) as Arc<dyn Ringer>,
            )
        }
    };

    let recorder = if std::env::var_os(TYPED_ONLY_ENV).is_some() {
        None
    } else {
        Some(RecordingCycle::new(
            Arc::new(CpalMicrophone::new(AudioConfig::default())),
            config.recording.to_recording_config(),
        ))
    };

    let parts = CallServiceParts {
        personas: Arc::clone(&personas),
        lifecycle: config.lifecycle.clone(),
        replies,
        stt: create_best_stt().map(Arc::from),
        tts: create_best_tts().map(Arc::from),
        playback,
        ringer,
        recorder,
    };
    let (handle, task) = CallService::spawn(parts);
    let mut notifications = handle.subscribe();

    // Like the setup screen: without an explicit voice, calls use the first catalog voice.
    let default_voice = match VoiceCatalog::from_env() {
        Ok(catalog) => match catalog.list().await {
            Ok(voices) => voices.into_iter().next().map(|v| v.id),
            Err(e) => {
                tracing::warn!("voice catalog unavailable: {}", e);
                None
            }
        },
        Err(_) => None,
    };
    let cli = Cli {
        handle: handle.clone(),
        presets,
        personas: Arc::clone(&personas),
        default_voice,
    };

    tracing::info!(storage_path = %config.storage_path, personas = personas.len(), "yougood ready");
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match cli.run_command(line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {}", e),
                }
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => print_notification(&notification),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notifications lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                break;
            }
        }
    }

    let _ = handle.shutdown();
    task.await?;
    Ok(())
}

struct Cli {
    handle: CallHandle,
    presets: PresetStore,
    personas: Arc<PersonaRegistry>,
    default_voice: Option<String>,
}

impl Cli {
    async fn arm(&self, mut config: CallConfig) -> CliResult<()> {
        if config.voice_id.trim().is_empty() {
            if let Some(voice) = &self.default_voice {
                config = config.with_voice(voice.clone());
            }
        }
        self.handle.arm(config).await?;
        Ok(())
    }

    /// Returns `Ok(false)` when the user asked to quit.
    async fn run_command(&self, line: &str) -> CliResult<bool> {
        let (handle, presets, personas) = (&self.handle, &self.presets, &*self.personas);
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match command {
            "" => {}
            "help" => print_help(),
            "quit" | "exit" => return Ok(false),
            "arm" => {
                self.arm(parse_call_args(&args)?).await?;
            }
            "cancel" => handle.cancel_waiting()?,
            "answer" => handle.answer()?,
            "decline" => handle.decline()?,
            "end" => handle.end_call()?,
            "say" => handle.submit_caller_turn(rest)?,
            "pin" => handle.request_pin_check(rest)?,
            "digit" => {
                for digit in rest.chars().filter(char::is_ascii_digit) {
                    handle.press_pin_digit(digit)?;
                }
            }
            "del" => handle.delete_pin_digit()?,
            "override" => handle.emergency_override()?,
            "status" => println!("{}", serde_json::to_string_pretty(&handle.snapshot())?),
            "personas" => {
                for id in personas.ids() {
                    if let Some(persona) = personas.get(id) {
                        println!("  {:<14} {}", id, persona.display_name);
                    }
                }
            }
            "plans" => {
                for plan in presets.list()? {
                    println!(
                        "  {}  {:<20} {} delay={}s {:?}",
                        plan.id,
                        plan.name,
                        plan.config.persona_id,
                        plan.config.delay(),
                        plan.config.intensity
                    );
                }
            }
            "save" => {
                let (name, call_args) = args
                    .split_first()
                    .ok_or("usage: save <name> <persona> <pin> [delay] [persistent]")?;
                let mut config = parse_call_args(call_args)?;
                config.validate(personas)?;
                config.plan_name = Some(name.to_string());
                let plan = presets.save(name, config)?;
                println!("saved {} ({})", plan.name, plan.id);
            }
            "launch" => {
                let id = args.first().ok_or("usage: launch <plan id>")?;
                self.arm(presets.launch(id)?).await?;
            }
            "delete" => {
                let id = args.first().ok_or("usage: delete <plan id>")?;
                if !presets.delete(id)? {
                    println!("no plan {}", id);
                }
            }
            "voices" => {
                let catalog = VoiceCatalog::from_env()?;
                for voice in catalog.list().await? {
                    println!("  {}  {} ({}, {})", voice.id, voice.name, voice.accent, voice.gender);
                }
            }
            other => println!("unknown command '{}', try help", other),
        }
        Ok(true)
    }
}

/// `<persona> <pin> [delay secs] [persistent] [ringtone=<id>] [voice=<id>] [name=<caller>]`
fn parse_call_args(args: &[&str]) -> CliResult<CallConfig> {
    let [persona, pin, options @ ..] = args else {
        return Err("usage: arm <persona> <pin> [delay] [persistent] [ringtone=..] [voice=..] [name=..]".into());
    };
    let mut config = CallConfig::new(*persona, *pin);
    for option in options {
        match option.split_once('=') {
            Some(("ringtone", id)) => config = config.with_ringtone(id),
            Some(("voice", id)) => config = config.with_voice(id),
            Some(("name", name)) => config = config.with_caller_name(name.replace('_', " ")),
            Some((key, _)) => return Err(format!("unknown option '{}'", key).into()),
            None if *option == "persistent" => config = config.with_intensity(Intensity::Persistent),
            None => config = config.with_delay(option.parse()?),
        }
    }
    Ok(config)
}

fn print_notification(notification: &CallNotification) {
    match notification {
        CallNotification::PhaseChanged { from, to } => println!("[{} -> {}]", from, to),
        CallNotification::MessageAppended { message } => {
            let who = match message.role {
                Role::Caller => "you",
                Role::Receiver => "them",
            };
            println!("{:>5}: {}", who, message.text);
        }
        CallNotification::TurnComplete => {}
        CallNotification::MicrophoneUnavailable { reason } => {
            println!("microphone unavailable ({}); use `say <text>`", reason)
        }
        CallNotification::PinRejected { attempts_remaining } => {
            println!("wrong PIN, {} attempts left", attempts_remaining)
        }
        CallNotification::PinAccepted => println!("PIN accepted, call disarmed"),
    }
}

fn print_help() {
    let delays: Vec<String> = TIMER_PRESETS
        .iter()
        .map(|p| format!("{}={}", p.label, p.delay_secs.unwrap_or(0)))
        .collect();
    println!("commands:");
    println!("  arm <persona> <pin> [delay] [persistent] [ringtone=..] [voice=..] [name=..]");
    println!("  cancel | answer | decline | end | say <text> | override");
    println!("  pin <digits> | digit <d..> | del");
    println!("  personas | voices | status");
    println!("  plans | save <name> <persona> <pin> [..] | launch <id> | delete <id>");
    println!("  quit");
    println!("delays: {}", delays.join(", "));
    println!("ringtones: {}", RINGTONE_IDS.join(", "));
}
