//! Exchange Engine - the upload state machine
//!
//! Drives one network round trip for the entry at the head of the work queue:
//!
//! ```text
//! SelectEndpoint -> Connect -> SendSession -> AwaitSessionAck
//!                -> SendPayload -> AwaitPayloadResponse
//!                -> Complete | Retry | Abandon
//! ```
//!
//! The head is only popped after an `Ack`, an explicit abandonment by the
//! entry's handler, or an accepted response to a one-shot entry. Every other
//! outcome retries the same head after a fixed backoff.

use crate::application::queue_entry::{Completion, QueueEntry};
use crate::application::work_queue::WorkQueue;
use crate::config::Config;
use crate::domain::entities::Endpoint;
use crate::domain::ports::{Clock, DeviceInfo};
use crate::domain::services::ServerDirectory;
use crate::error::{ProtocolError, Result, UplinkError};
use crate::infrastructure::ShutdownController;
use crate::wire::codec::{read_frame, write_data_request, write_frame};
use crate::wire::messages::{peek_opcode, Opcode, Request, Response, SessionRequest};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Stages of one exchange attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    SelectEndpoint,
    Connect,
    SendSession,
    AwaitSessionAck,
    SendPayload,
    AwaitPayloadResponse,
}

/// Result of one engine tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The queue was empty.
    Idle,
    /// The payload was acknowledged; `on_success` ran and the entry was popped.
    Completed,
    /// A response in the entry's accepted set was handled and answered.
    Responded { acknowledged: bool, popped: bool },
    /// The handler declined a retry; the entry was popped without `on_success`.
    Abandoned,
    /// The attempt failed at `state`; the head stays queued.
    Retry { state: ExchangeState, reason: String },
}

impl ExchangeOutcome {
    /// Whether the loop should back off before the next tick.
    pub fn needs_backoff(&self) -> bool {
        matches!(
            self,
            ExchangeOutcome::Retry { .. } | ExchangeOutcome::Responded { popped: false, .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub error_backoff: Duration,
    pub idle_wait: Duration,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(1),
            idle_wait: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            error_backoff: cfg.error_backoff(),
            idle_wait: cfg.idle_wait(),
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
        }
    }
}

/// Failure of one stage, before it is turned into a `Retry` outcome.
struct StageFailure {
    state: ExchangeState,
    error: UplinkError,
}

fn at(state: ExchangeState) -> impl FnOnce(UplinkError) -> StageFailure {
    move |error| StageFailure { state, error }
}

fn timed_out(what: &str, after: Duration) -> UplinkError {
    UplinkError::Transport(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("{} timed out after {:?}", what, after),
    ))
}

pub struct ExchangeEngine {
    queue: Arc<WorkQueue>,
    directory: Arc<ServerDirectory>,
    clock: Arc<dyn Clock>,
    device: Arc<dyn DeviceInfo>,
    settings: EngineSettings,
}

impl ExchangeEngine {
    pub fn new(
        queue: Arc<WorkQueue>,
        directory: Arc<ServerDirectory>,
        clock: Arc<dyn Clock>,
        device: Arc<dyn DeviceInfo>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            queue,
            directory,
            clock,
            device,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run ticks until shutdown. An empty directory stops every task.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownController) {
        tracing::info!("exchange engine started");

        while !shutdown.is_shutdown() {
            let pause = match self.tick().await {
                Ok(ExchangeOutcome::Idle) => Some(self.settings.idle_wait),
                Ok(outcome) if outcome.needs_backoff() => Some(self.settings.error_backoff),
                Ok(_) => None,
                Err(e) if e.is_fatal() => {
                    shutdown.fail(&e.to_string());
                    break;
                }
                Err(e) => {
                    tracing::warn!("exchange tick failed: {}", e);
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(pause) = pause {
                if !shutdown.sleep(pause).await {
                    break;
                }
            }
        }

        tracing::info!("exchange engine stopped");
    }

    /// Run one iteration against the current queue head.
    ///
    /// Only configuration-fatal conditions are returned as errors; every
    /// per-attempt failure becomes `ExchangeOutcome::Retry`.
    pub async fn tick(&self) -> Result<ExchangeOutcome> {
        if self.directory.is_empty() {
            return Err(UplinkError::EmptyDirectory);
        }

        let Some(entry) = self.queue.peek_front() else {
            return Ok(ExchangeOutcome::Idle);
        };

        match self.exchange(&entry).await {
            Ok(ExchangeOutcome::Retry { state, reason }) => {
                tracing::warn!("exchange {} retrying after {:?}: {}", entry.id, state, reason);
                Ok(ExchangeOutcome::Retry { state, reason })
            }
            Ok(outcome) => Ok(outcome),
            Err(StageFailure { state, error }) => {
                tracing::warn!(
                    "exchange {} ({}) failed at {:?}: {}",
                    entry.id,
                    entry.opcode().name(),
                    state,
                    error
                );
                Ok(ExchangeOutcome::Retry {
                    state,
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn io<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(what, self.settings.io_timeout)),
        }
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let connect = TcpStream::connect(endpoint.addr());
        let stream = match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => return Err(timed_out("connect", self.settings.connect_timeout)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("failed to set TCP_NODELAY for {}: {}", endpoint, e);
        }
        Ok(stream)
    }

    async fn exchange(&self, entry: &Arc<QueueEntry>) -> std::result::Result<ExchangeOutcome, StageFailure> {
        use ExchangeState::*;

        let endpoint = self
            .directory
            .select_available(self.clock.now())
            .map_err(at(SelectEndpoint))?;
        tracing::debug!("exchange {} -> {}", entry.id, endpoint);

        let mut stream = self.connect(&endpoint).await.map_err(at(Connect))?;

        let session = Request::Session(SessionRequest {
            node_id: self.device.node_id(),
            power_level: self.device.power_level(),
            memory_usage: self.device.memory_usage(),
            next_opcode: entry.opcode(),
        });
        self.io("send session", write_frame(&mut stream, &session.encode()))
            .await
            .map_err(at(SendSession))?;

        let reply = self
            .io("await session ack", read_frame(&mut stream))
            .await
            .map_err(at(AwaitSessionAck))?;
        match Response::decode(reply).map_err(|e| at(AwaitSessionAck)(UplinkError::from(e)))? {
            Response::Ack => {}
            Response::Reset => {
                return Ok(ExchangeOutcome::Retry {
                    state: AwaitSessionAck,
                    reason: format!("session reset by {}", endpoint),
                });
            }
            Response::Blocked {
                expected_busy_seconds,
            } => {
                self.directory
                    .mark_blocked(&endpoint, expected_busy_seconds, self.clock.now());
                return Ok(ExchangeOutcome::Retry {
                    state: AwaitSessionAck,
                    reason: format!("{} busy for {}s", endpoint, expected_busy_seconds),
                });
            }
            other => {
                let error = ProtocolError::UnexpectedResponse {
                    opcode: other.opcode().as_u8(),
                    request: Opcode::Session.as_u8(),
                };
                return Err(at(AwaitSessionAck)(UplinkError::from(error)));
            }
        }
        tracing::debug!("session with {} acknowledged", endpoint);

        let sent = match (&entry.request, &entry.source_file) {
            (Request::Data(data), Some(path)) => self
                .io("send data", write_data_request(&mut stream, data, path))
                .await
                .map(|_| ()),
            (request, _) => self.io("send payload", write_frame(&mut stream, &request.encode())).await,
        };
        sent.map_err(at(SendPayload))?;

        let payload = self
            .io("await response", read_frame(&mut stream))
            .await
            .map_err(at(AwaitPayloadResponse))?;

        let outcome = self
            .handle_response(entry, &endpoint, &mut stream, payload)
            .await
            .map_err(at(AwaitPayloadResponse))?;

        drop(stream);
        Ok(outcome)
    }

    async fn handle_response(
        &self,
        entry: &Arc<QueueEntry>,
        endpoint: &Endpoint,
        stream: &mut TcpStream,
        payload: bytes::Bytes,
    ) -> Result<ExchangeOutcome> {
        let raw = peek_opcode(&payload)?;
        let opcode = Opcode::from_u8(raw);
        let handler = &entry.handler;

        match opcode {
            Some(op @ (Opcode::Reset | Opcode::Blocked)) => {
                if let Response::Blocked {
                    expected_busy_seconds,
                } = Response::decode(payload)?
                {
                    self.directory
                        .mark_blocked(endpoint, expected_busy_seconds, self.clock.now());
                }

                if handler.on_error(entry, op) {
                    Ok(ExchangeOutcome::Retry {
                        state: ExchangeState::AwaitPayloadResponse,
                        reason: format!("payload answered with {}", op),
                    })
                } else {
                    self.queue.pop_front_if(entry.id);
                    tracing::warn!("abandoned {} after {}", entry.id, op);
                    Ok(ExchangeOutcome::Abandoned)
                }
            }
            Some(Opcode::Ack) => {
                Response::decode(payload)?;
                handler.on_success(entry).await;
                self.queue.pop_front_if(entry.id);
                tracing::debug!("exchange {} complete", entry.id);
                Ok(ExchangeOutcome::Completed)
            }
            Some(op) if handler.accepted_responses().contains(&op) => {
                let acknowledged = handler.on_accepted_response(&payload);
                let reply = if acknowledged {
                    Response::Ack
                } else {
                    Response::Reset
                };
                if let Err(e) = self.io("send reply", write_frame(stream, &reply.encode())).await {
                    tracing::warn!("failed to answer {} to {}: {}", reply.opcode(), endpoint, e);
                }

                let popped = handler.completion() == Completion::OneShot
                    && self.queue.pop_front_if(entry.id).is_some();
                Ok(ExchangeOutcome::Responded {
                    acknowledged,
                    popped,
                })
            }
            Some(op) => Err(ProtocolError::UnexpectedResponse {
                opcode: op.as_u8(),
                request: entry.opcode().as_u8(),
            }
            .into()),
            None => Err(ProtocolError::UnknownOpcode(raw).into()),
        }
    }
}
