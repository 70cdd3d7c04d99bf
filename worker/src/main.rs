use std::{env, io};

use log::info;
use tokio::{net::TcpStream, signal};
use worker::{NoiseTrainer, serve};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = env::var("ORCHESTRATOR_ADDR").map_err(io::Error::other)?;
    let cid = env::var("WORKER_ID").unwrap_or_else(|_| "0".to_string());
    let num_examples = env::var("NUM_EXAMPLES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);
    let seed = env::var("SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(0);

    let stream = TcpStream::connect(&addr).await?;
    let local = stream.local_addr()?;
    info!("connected to orchestrator at {addr} as worker {cid}");

    let props = worker::serve::properties(
        &cid,
        &env::var("DEVICE").unwrap_or_else(|_| "unknown".to_string()),
        &local.ip().to_string(),
        &env::var("MAC").unwrap_or_else(|_| "00:00:00:00:00:00".to_string()),
    );

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    let mut trainer = NoiseTrainer::new(num_examples, seed);

    tokio::select! {
        result = serve(rx, tx, props, &mut trainer) => {
            info!("serve loop finished");
            result
        }
        _ = signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
