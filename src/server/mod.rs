//! The hook server: accepts loopback connections from external VCS
//! processes and runs one request through decode, authenticate,
//! dispatch and respond. Every connection carries exactly one request.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

use crate::{
    auth::HookAuthenticator,
    dispatch::{DispatchError, HookContext, HookDispatcher},
    protocol::{self, DEFAULT_MAX_FRAME_BYTES, HookMessage, HookRequest, HookResponse, ProtocolError},
    transaction,
};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bound on waiting for the request frame, so a hung hook process
    /// cannot pin a task indefinitely.
    pub read_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Clone)]
struct ServerState {
    authenticator: Arc<HookAuthenticator>,
    dispatcher: Arc<HookDispatcher>,
    options: ServerOptions,
}

pub struct HookServer {
    listener: TcpListener,
    state: ServerState,
}

impl HookServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        authenticator: Arc<HookAuthenticator>,
        dispatcher: Arc<HookDispatcher>,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: ServerState {
                authenticator,
                dispatcher,
                options,
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop: one spawned task per connection.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "hook server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, state).await {
                    error!(peer = %peer, error = %err, "failed to handle hook connection");
                }
            });
        }
    }
}

/// One request lifecycle. A frame that fails to decode closes the
/// connection without a response and without consuming the challenge.
async fn handle_connection(stream: TcpStream, state: ServerState) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(stream, protocol::codec(state.options.max_frame_bytes));

    let request: HookRequest =
        tokio::time::timeout(state.options.read_timeout, protocol::receive(&mut framed))
            .await
            .map_err(|_| {
                ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "hook request read timed out",
                ))
            })??;

    let response = process(&state, &request);
    protocol::send(&mut framed, &response).await
}

fn process(state: &ServerState, request: &HookRequest) -> HookResponse {
    let environment = match state.authenticator.authenticate(request) {
        Ok(environment) => environment,
        Err(failure) => {
            warn!(
                transaction_id = %request.transaction_id,
                repository_id = %request.repository_id,
                error = %failure,
                "hook authentication failed"
            );
            return HookResponse::aborted(Vec::new(), failure.to_string());
        }
    };

    let context = HookContext::new(&request.repository_id, request.hook_type, request.node.clone());
    let outcome = {
        let _pending = environment.begin_pending(request.hook_type);
        transaction::bind(&request.transaction_id, || {
            state.dispatcher.dispatch(&context)
        })
    };

    build_response(outcome, context.into_messages())
}

/// Maps the dispatch outcome onto the wire response. Listener messages
/// keep their order; every failure appends exactly one terminal ERROR
/// whose text stays free of internal detail. The full error goes to
/// the log only.
fn build_response(outcome: Result<(), DispatchError>, messages: Vec<HookMessage>) -> HookResponse {
    match outcome {
        Ok(()) => HookResponse::accepted(messages),
        Err(err) => {
            match &err {
                DispatchError::RepositoryNotFound(id) => {
                    warn!(repository_id = %id, "hook event for unknown repository");
                }
                DispatchError::Domain { code, message } => {
                    warn!(code = %code, message = %message, "hook listener rejected the operation");
                }
                DispatchError::Unknown(source) => {
                    error!(error = %source, "hook listener failed unexpectedly");
                }
            }
            HookResponse::aborted(messages, err.to_string())
        }
    }
}
