//! Participant node: a TCP service in front of one [`Ledger`].
//!
//! Each accepted connection is served on its own task and carries exactly one
//! request. Protocol commands are routed to the ledger, after the node's
//! [`FaultPolicy`] has had its say on prepares. Fault-injection commands
//! (`crash`, `restart`, `delay`) only touch the policy or the handling task.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::NodeConfig;
use crate::data_store::Ledger;
use crate::errors::Result;
use crate::fault::FaultPolicy;
use crate::message::{Command, Request, Response, Status};
use crate::registry::{ParticipantRef, Role};
use crate::transport::frame_codec;
use crate::twopc::{PrepareVote, TransferChange, TwoPhaseCommitParticipant};

/// How long `delay` stalls when the request names no duration.
const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Command routing for one participant, independent of any socket.
pub struct NodeService {
    port: u16,
    ledger: Ledger,
    faults: FaultPolicy,
}

impl NodeService {
    pub fn new(port: u16, ledger: Ledger, faults: FaultPolicy) -> Self {
        Self {
            port,
            ledger,
            faults,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn faults(&self) -> &FaultPolicy {
        &self.faults
    }

    /// Handles one request and produces its response. Never fails: problems
    /// are reported as `status=error` with a reason.
    pub async fn handle(&self, request: Request) -> Response {
        debug!(
            "[NODE {}] Received {:?} for TX {}",
            self.port,
            request.command,
            request.tx_id.as_deref().unwrap_or("unknown")
        );

        match request.command {
            Command::Balance => Response::new(Status::Success)
                .with_balance(self.ledger.balance())
                .with_crashed(self.faults.is_crashed())
                .with_port(self.port),
            Command::Reset => Response::new(Status::Success)
                .with_balance(self.ledger.reset())
                .with_port(self.port),
            Command::Crash => {
                self.faults.crash();
                Response::new(Status::Crashed).with_port(self.port)
            }
            Command::Restart => {
                self.faults.restart();
                Response::new(Status::Restarted).with_port(self.port)
            }
            Command::Delay => {
                let delay = request
                    .delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_DELAY);
                tokio::time::sleep(delay).await;
                Response::new(Status::Delayed).with_delay(delay.as_millis() as u64)
            }
            Command::Prepare => self.prepare(request).await,
            Command::Commit => self.commit(request),
            Command::Rollback => self.rollback(request),
        }
    }

    async fn prepare(&self, request: Request) -> Response {
        let (Some(tx_id), Some(amount), Some(operation)) =
            (request.tx_id, request.amount, request.operation)
        else {
            return Response::error("malformed request: prepare needs tx_id, amount and operation");
        };
        let change = TransferChange { amount, operation };

        if let Err(e) = self.ledger.begin(&tx_id, change) {
            return Response::error(e.to_string()).with_tx_id(tx_id);
        }

        let vote = if let Some(reason) = self.faults.prepare_fault() {
            warn!("[NODE {}] TX {} injected failure during prepare", self.port, tx_id);
            self.ledger.fail(&tx_id, reason)
        } else if !self.ledger.prepare(amount, operation) {
            // Refused right away; only admissible prepares are stalled.
            self.ledger.vote(&tx_id)
        } else {
            let stall = request
                .delay_ms
                .map(Duration::from_millis)
                .or_else(|| self.faults.prepare_delay());
            if let Some(stall) = stall {
                debug!("[NODE {}] TX {} stalling prepare for {:?}", self.port, tx_id, stall);
                tokio::time::sleep(stall).await;
            }
            // Admission is checked again: other prepares may have moved the balance meanwhile.
            self.ledger.vote(&tx_id)
        };

        match vote {
            Ok(PrepareVote::Ready) => Response::new(Status::Ready).with_tx_id(tx_id),
            Ok(PrepareVote::Abort(reason)) => Response::new(Status::Abort)
                .with_reason(reason)
                .with_tx_id(tx_id),
            Ok(PrepareVote::Failed(reason)) => Response::error(reason).with_tx_id(tx_id),
            Err(e) => Response::error(e.to_string()).with_tx_id(tx_id),
        }
    }

    fn commit(&self, request: Request) -> Response {
        let Some(tx_id) = request.tx_id else {
            return Response::error("malformed request: commit needs tx_id");
        };
        let expected = match (request.amount, request.operation) {
            (Some(amount), Some(operation)) => Some(TransferChange { amount, operation }),
            _ => None,
        };

        match self.ledger.commit_transaction(tx_id.clone(), expected) {
            Ok(balance) => Response::new(Status::Committed)
                .with_balance(balance)
                .with_tx_id(tx_id),
            Err(e) => Response::error(e.to_string()).with_tx_id(tx_id),
        }
    }

    fn rollback(&self, request: Request) -> Response {
        let Some(tx_id) = request.tx_id else {
            return Response::error("malformed request: rollback needs tx_id");
        };

        match self.ledger.abort_transaction(tx_id.clone()) {
            Ok(()) => Response::new(Status::RolledBack).with_tx_id(tx_id),
            Err(e) => Response::error(e.to_string()).with_tx_id(tx_id),
        }
    }
}

/// A bound, not yet running, participant node.
pub struct ParticipantNode {
    listener: TcpListener,
    service: Arc<NodeService>,
    max_frame_length: usize,
}

impl ParticipantNode {
    /// Validates `config` and binds the listening socket.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();

        let ledger = Ledger::new(format!("NODE {}", port), config.initial_balance);
        let faults = FaultPolicy::new(config.fail_probability)?;

        info!("[NODE {}] Started on {}:{}", port, config.host, port);
        info!("[NODE {}] Initial balance: {}", port, config.initial_balance);
        info!(
            "[NODE {}] Failure probability: {}%",
            port,
            config.fail_probability * 100.0
        );

        Ok(Self {
            listener,
            service: Arc::new(NodeService::new(port, ledger, faults)),
            max_frame_length: config.max_frame_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service(&self) -> Arc<NodeService> {
        Arc::clone(&self.service)
    }

    /// Serves until the process ends.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Connections already accepted finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let port = self.service.port();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[NODE {}] Stopped", port);
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(s) => s,
                        Err(e) => {
                            error!("[NODE {}] Accept error: {}", port, e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let service = Arc::clone(&self.service);
                    let max_frame_length = self.max_frame_length;
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, service, max_frame_length).await {
                            debug!("[NODE {}] Client {} error: {}", port, peer, e);
                        }
                    });
                }
            }
        }
    }

    /// Runs the node on the current runtime and returns a handle to it.
    pub fn spawn(self) -> Result<NodeHandle> {
        let addr = self.local_addr()?;
        let service = self.service();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(self.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(NodeHandle {
            addr,
            service,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

async fn serve_connection(
    stream: TcpStream,
    service: Arc<NodeService>,
    max_frame_length: usize,
) -> Result<()> {
    let mut framed = Framed::new(stream, frame_codec(max_frame_length));

    let frame = match framed.next().await {
        Some(frame) => frame?,
        None => return Ok(()),
    };

    let response = match Request::decode(&frame) {
        Ok(request) => service.handle(request).await,
        Err(e) => Response::error(format!("malformed request: {}", e)),
    };

    framed.send(response.encode()?).await?;
    Ok(())
}

/// Handle to a node running in the background. Dropping it stops the node.
pub struct NodeHandle {
    addr: SocketAddr,
    service: Arc<NodeService>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn service(&self) -> &Arc<NodeService> {
        &self.service
    }

    /// Describes this node for a coordinator's registry.
    pub fn participant(&self, role: Role, name: impl Into<String>) -> ParticipantRef {
        ParticipantRef::new(self.addr.ip().to_string(), self.addr.port(), role, name)
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("[NODE {}] Accept loop ended abnormally: {}", self.port(), e);
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
