//! The request loop answering the orchestrator's RPC contract.

use std::{collections::BTreeMap, io};

use comms::{
    FrameReceiver, FrameSender,
    event::unix_secs,
    msg::{Request, Response, metric},
};
use log::info;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::trainer::{FitParams, Trainer};

/// Serves requests on one connection until the orchestrator hangs up.
///
/// # Arguments
/// * `props` - The property map answered to `GetProperties`.
///
/// # Errors
/// Returns `io::Error` on transport failure; a closed connection is
/// a clean exit, not an error.
pub async fn serve<R, W, T>(
    mut rx: FrameReceiver<R>,
    mut tx: FrameSender<W>,
    props: BTreeMap<String, String>,
    trainer: &mut T,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    T: Trainer,
{
    loop {
        let request: Request = match rx.recv().await {
            Ok(request) => request,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("orchestrator disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let response = handle(request, &props, trainer);
        tx.send(&response).await?;
    }
}

fn handle<T: Trainer>(
    request: Request,
    props: &BTreeMap<String, String>,
    trainer: &mut T,
) -> Response {
    match request {
        Request::GetProperties => Response::Properties(props.clone()),
        Request::Fit {
            weights,
            round,
            batch_size,
            epochs,
        } => {
            info!("fit requested for round {round}");
            let params = FitParams {
                round,
                batch_size,
                epochs,
            };

            let compute_start = unix_secs();
            let out = trainer.fit(&weights, &params);
            let compute_finish = unix_secs();

            let mut metrics = out.metrics;
            metrics.insert(metric::COMPUTE_START_TIME.to_string(), compute_start);
            metrics.insert(metric::COMPUTE_FINISH_TIME.to_string(), compute_finish);

            Response::Fit {
                weights: out.tensors,
                num_examples: out.num_examples,
                metrics,
            }
        }
        Request::Evaluate { weights } => {
            let (loss, metrics) = trainer.evaluate(&weights);
            Response::Evaluate { loss, metrics }
        }
    }
}

/// Builds the property map a worker declares about itself.
pub fn properties(cid: &str, device: &str, ip: &str, mac: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("cid".to_string(), cid.to_string()),
        ("device".to_string(), device.to_string()),
        ("ip".to_string(), ip.to_string()),
        ("mac".to_string(), mac.to_string()),
    ])
}
