//! TCP-backed implementation of the worker RPC contract.

use std::{collections::BTreeMap, io, time::Duration};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Metrics, Request, Response},
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};

use crate::{
    client::WorkerClient,
    error::ClientError,
    state::{GlobalState, Instruction, WorkResult, WorkerId},
};

struct Conn {
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
}

/// One remote worker reached over a framed TCP connection. Calls on
/// the same worker are serialized; the pipe carries one
/// request/response pair at a time.
pub struct RemoteWorker {
    id: WorkerId,
    conn: Mutex<Conn>,
}

impl RemoteWorker {
    pub fn new(id: WorkerId, stream: TcpStream) -> Self {
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Self {
            id,
            conn: Mutex::new(Conn { rx, tx }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, request: &Request) -> Result<Response, ClientError> {
        let mut conn = self.conn.lock().await;
        conn.tx.send(request).await?;
        Ok(conn.rx.recv().await?)
    }
}

impl WorkerClient for RemoteWorker {
    async fn discover_properties(
        &self,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let response = tokio::time::timeout(timeout, self.call(&Request::GetProperties))
            .await
            .map_err(|_| ClientError::TimedOut)??;

        match response {
            Response::Properties(props) => Ok(props),
            Response::Err(msg) => Err(ClientError::Remote(msg)),
            other => Err(unexpected("properties", &other)),
        }
    }

    async fn do_work(&self, instruction: &Instruction) -> Result<WorkResult, ClientError> {
        let request = Request::Fit {
            weights: instruction.state.tensors.clone(),
            round: instruction.config.round,
            batch_size: instruction.config.batch_size,
            epochs: instruction.config.epochs,
        };

        match self.call(&request).await? {
            Response::Fit {
                weights,
                num_examples,
                metrics,
            } => Ok(WorkResult {
                worker_id: self.id.clone(),
                tensors: weights,
                num_examples,
                metrics,
            }),
            Response::Err(msg) => Err(ClientError::Remote(msg)),
            other => Err(unexpected("fit result", &other)),
        }
    }

    async fn evaluate(&self, state: &GlobalState) -> Result<(f64, Metrics), ClientError> {
        let request = Request::Evaluate {
            weights: state.tensors.clone(),
        };

        match self.call(&request).await? {
            Response::Evaluate { loss, metrics } => Ok((loss, metrics)),
            Response::Err(msg) => Err(ClientError::Remote(msg)),
            other => Err(unexpected("evaluation", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Response) -> ClientError {
    ClientError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {wanted}, got {got:?}"),
    ))
}
