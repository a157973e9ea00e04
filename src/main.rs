use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use taplooper::audio::stream::list_devices;
use taplooper::audio::{CpalBackend, LooperCommand, LooperEngine, LooperNotification, SessionView};
use taplooper::config::{LooperConfig, default_config_path, load_config};
use taplooper::ui::TerminalUI;

const LOG_FILE: &str = "taplooper.log";

/// Longest the engine thread sleeps between polls; bounds input ring fill
/// and view staleness.
const IDLE_WAIT: Duration = Duration::from_millis(10);

fn print_help() {
    println!("Taplooper - Single-button live looper");
    println!();
    println!("USAGE:");
    println!("    taplooper [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print this help message");
    println!("    --debug              Enable debug logging");
    println!("    --config <path>      Read settings from <path> (default: taplooper.toml)");
    println!("    --list-devices       List audio devices and exit");
    println!();
    println!("DESCRIPTION:");
    println!("    Tap once to count in and record, tap again to close the loop.");
    println!("    Loop length is snapped to whole beats of the session tempo;");
    println!("    further taps overdub new layers on the next beat boundary.");
    println!("    Double-tap undoes the most recent layer.");
    println!();
    println!("CONTROLS:");
    println!("    Space  Tap (record / close loop / overdub)");
    println!("    S      Stop");
    println!("    U      Undo last layer");
    println!("    X      Hard reset");
    println!("    T      Set BPM (only while no layers exist)");
    println!("    C      Cycle count-in beats (0-8)");
    println!("    N/A/W  Metronome on, click audible, click while looping");
    println!("    ↑↓     Select layer");
    println!("    +/-    Adjust volume");
    println!("    M      Mute/unmute selected layer");
    println!("    D      Delete selected layer");
    println!("    P      Save BPM, count-in and metronome to the config file");
    println!("    Q      Quit");
    println!();
    println!("Logs are written to {}.", LOG_FILE);
}

fn init_logging(debug_mode: bool) {
    let default_filter = if debug_mode { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format_timestamp_millis();
    match std::fs::File::create(LOG_FILE) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => eprintln!("Could not open {}: {}, logging to stderr", LOG_FILE, e),
    }
    builder.init();
}

fn config_path(args: &[String]) -> Result<PathBuf> {
    match args.iter().position(|a| a == "--config") {
        Some(i) => args
            .get(i + 1)
            .map(PathBuf::from)
            .context("--config needs a path"),
        None => Ok(default_config_path()),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        return Ok(());
    }

    if args.contains(&"--list-devices".to_string()) {
        return list_devices();
    }

    let debug_mode = args.contains(&"--debug".to_string());
    init_logging(debug_mode);

    let config_path = config_path(&args)?;
    let config = load_config(&config_path);
    let ui_config = config.clone();

    let (command_sender, command_receiver) = channel::unbounded::<LooperCommand>();
    let (notification_sender, notification_receiver) = channel::unbounded::<LooperNotification>();
    let session = Arc::new(Mutex::new(SessionView::default()));

    // cpal streams are not Send, so the engine is built on its own thread
    let engine_session = Arc::clone(&session);
    let engine_thread = thread::spawn(move || {
        if let Err(e) = run_engine_thread(
            config,
            command_receiver,
            notification_sender,
            engine_session,
        ) {
            log::error!("engine thread error: {:#}", e);
        }
    });

    let mut ui = TerminalUI::new(
        session,
        command_sender.clone(),
        notification_receiver,
        ui_config,
        config_path,
    )
    .map_err(|e| anyhow::anyhow!("UI creation failed: {}", e))?;
    let result = ui
        .run()
        .map_err(|e| anyhow::anyhow!("UI run failed: {}", e));
    drop(ui);

    let _ = command_sender.send(LooperCommand::Shutdown);
    if engine_thread.join().is_err() {
        log::error!("engine thread panicked");
    }

    result?;
    println!("Taplooper stopped.");
    Ok(())
}

fn run_engine_thread(
    config: LooperConfig,
    commands: Receiver<LooperCommand>,
    notifications: Sender<LooperNotification>,
    session: Arc<Mutex<SessionView>>,
) -> Result<()> {
    let backend = CpalBackend::new(config.devices.clone());
    let stream_errors = backend.stream_errors();
    let mut engine = LooperEngine::new(Box::new(backend), &config.session, config.metronome)
        .context("creating looper engine")?;
    engine.set_notifier(notifications.clone());

    // Failure is kept in the view; the first tap retries.
    let _ = engine.acquire();
    publish(&engine, &session);

    loop {
        let now = Instant::now();
        let wait = engine
            .next_deadline()
            .map_or(IDLE_WAIT, |deadline| {
                deadline.saturating_duration_since(now).min(IDLE_WAIT)
            });

        select! {
            recv(commands) -> command => match command {
                Ok(LooperCommand::Shutdown) | Err(_) => {
                    engine.hard_reset();
                    log::info!("engine thread shutting down");
                    return Ok(());
                }
                Ok(command) => {
                    log::debug!("command: {:?}", command);
                    if let Err(e) = engine.apply(command, Instant::now()) {
                        log::warn!("{}", e);
                        let _ = notifications.try_send(LooperNotification::Error(e.to_string()));
                    }
                }
            },
            recv(stream_errors) -> message => {
                if let Ok(message) = message {
                    engine.stream_failed(&message);
                }
            },
            default(wait) => {}
        }

        engine.poll(Instant::now());
        publish(&engine, &session);
    }
}

fn publish(engine: &LooperEngine, session: &Mutex<SessionView>) {
    let view = engine.view(Instant::now());
    match session.lock() {
        Ok(mut shared) => *shared = view,
        Err(poisoned) => *poisoned.into_inner() = view,
    }
}
