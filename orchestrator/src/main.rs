use std::{env, io, num::NonZeroUsize, path::Path, sync::Arc, time::Duration};

use comms::RelayHandle;
use log::{info, warn};
use orchestrator::{
    Directory, GlobalState, History, RunConfig, Scheduler,
    config::RelayConfig,
    net::RemoteWorker,
    timing::TimingLog,
};
use tokio::net::TcpListener;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: &str = "8080";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = config_from_env()?;
    let shape = model_shape_from_env()?;

    let relay = match &config.relay {
        Some(RelayConfig {
            bind_addr,
            connect_addr,
        }) => {
            comms::bridge::spawn(bind_addr.as_str(), connect_addr.as_str()).await?;
            comms::relay::connect(connect_addr.as_str(), "server").await?
        }
        None => RelayHandle::disabled(),
    };

    let directory = Arc::new(Directory::new(
        relay.clone(),
        config.discovery_timeout,
        config.discovery_concurrency.get(),
    ));

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string()),
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("listening for workers at {addr}");

    {
        let directory = Arc::clone(&directory);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let id = peer.to_string();
                        let worker = RemoteWorker::new(id.clone(), stream);
                        directory.register(id, worker).await;
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        });
    }

    let log_path = env::var("LOG_PATH").unwrap_or_else(|_| "fl_task_times.csv".to_string());
    let timing_log = TimingLog::create(Path::new(&log_path))?;

    let mut scheduler = Scheduler::new(config, directory, relay, timing_log)
        .map_err(io::Error::other)?;

    let history = scheduler.run(GlobalState::zeros(&shape)).await;
    print_history(&history);
    Ok(())
}

fn print_history(history: &History) {
    for summary in history.rounds() {
        info!(
            "round {}: sampled={} successes={} failures={} loss={:?}",
            summary.round,
            summary.sampled.len(),
            summary.num_successes,
            summary.num_failures,
            summary.loss,
        );
    }
}

fn config_from_env() -> io::Result<RunConfig> {
    let defaults = RunConfig::default();

    Ok(RunConfig {
        num_rounds: parse_or("NUM_ROUNDS", defaults.num_rounds)?,
        workers_per_round: parse_or("WORKERS_PER_ROUND", defaults.workers_per_round)?,
        min_workers_per_round: parse_or("MIN_WORKERS_PER_ROUND", defaults.min_workers_per_round)?,
        batch_size: parse_or("BATCH_SIZE", defaults.batch_size)?,
        epochs: parse_or("EPOCHS", defaults.epochs)?,
        dispatch_concurrency: env::var("DISPATCH_CONCURRENCY")
            .ok()
            .map(|v| {
                v.parse::<usize>()
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .ok_or_else(|| invalid("DISPATCH_CONCURRENCY", &v))
            })
            .transpose()?,
        call_deadline: env::var("CALL_DEADLINE_SECS")
            .ok()
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| invalid("CALL_DEADLINE_SECS", &v))
            })
            .transpose()?,
        sample_timeout: Duration::from_secs(parse_or(
            "SAMPLE_TIMEOUT_SECS",
            defaults.sample_timeout.as_secs(),
        )?),
        relay: relay_from_env(),
        ..defaults
    })
}

fn relay_from_env() -> Option<RelayConfig> {
    let bind_addr = env::var("RELAY_BIND").ok()?;
    let connect_addr = env::var("RELAY_CONNECT").ok()?;
    Some(RelayConfig {
        bind_addr,
        connect_addr,
    })
}

/// Comma-separated tensor sizes, e.g. `MODEL_SHAPE=64,10`.
fn model_shape_from_env() -> io::Result<Vec<usize>> {
    let raw = env::var("MODEL_SHAPE").unwrap_or_else(|_| "16".to_string());
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| invalid("MODEL_SHAPE", &raw))
        })
        .collect()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> io::Result<T> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| invalid(key, &value)),
        Err(_) => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid {key}: {value:?}"),
    )
}
