use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;
use tripwire_clock::SystemClock;
use tripwire_engine::{EngineConfig, JsonFileStore, TriggerEngine};
use tripwire_runner::{CliArgs, Command, HELP, pump_records};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            eprintln!("{}", HELP);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}\n", e);
            eprintln!("{}", HELP);
            std::process::exit(1);
        }
    };

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => {
            log::info!("Using default configuration");
            EngineConfig::default()
        }
    };
    log::info!("Definitions: {}", args.definitions.display());
    log::info!("Trigger log: {}", args.trigger_log.display());

    let clock = Arc::new(SystemClock::new().with_lag(config.evaluation_lag()));
    let store = Arc::new(JsonFileStore::new(&args.definitions, &args.trigger_log));
    let engine = TriggerEngine::new(config, store.clone(), store, clock)?
        .start()
        .await;

    let feed = tokio::spawn(pump_records(
        BufReader::new(tokio::io::stdin()),
        engine.feed_sender(),
    ));

    let mut triggers = engine.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match triggers.recv().await {
                Ok(event) => println!("{}", serde_json::to_string(&event).unwrap_or_default()),
                Err(RecvError::Lagged(n)) => log::warn!("Trigger reporter lagged by {}", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested");

    feed.abort();
    reporter.abort();
    engine.shutdown().await;
    Ok(())
}
