//! TCP control server
//!
//! Clients connect and exchange newline-delimited JSON envelopes. The
//! server never touches fixtures from another thread: [`NetworkTask`]
//! runs it twice per tick, once to accept and dispatch input before the
//! fixtures animate, once to broadcast monitor events after they commit.

mod connection;
mod framing;
mod handlers;
mod protocol;
mod task;

pub use connection::{Connection, ReadOutcome, MAX_OUTBOUND};
pub use framing::{LineBuffer, MAX_LINE_LEN};
pub use handlers::{
    dispatch, dispatch_guarded, CommandError, DEFAULT_EFFECT_DURATION, RELATIVE_KWARG, VALUE_LIMIT,
};
pub use protocol::{decode, reply, Command, Envelope, ErrorCode, Request};
pub use task::{NetworkTask, Phase};

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use serde_json::Value as JsonValue;
use stagelight_core::EngineContext;
use tracing::{debug, error, info, warn};

use crate::Result;

/// Listening socket plus connected clients
#[derive(Debug)]
pub struct ControlServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    clients: Vec<Connection>,
    next_id: u64,
}

impl ControlServer {
    /// Bind a non-blocking listener
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Control server listening on {}", local_addr);
        Ok(Self {
            listener: Some(listener),
            local_addr,
            clients: Vec::new(),
            next_id: 0,
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accept new clients, then read and dispatch their commands
    pub fn run_input(&mut self, ctx: &mut EngineContext) {
        self.accept_connections(ctx);

        let mut closed = Vec::new();
        for (index, client) in self.clients.iter_mut().enumerate() {
            let outcome = client.read_lines();
            for line in outcome.lines {
                let reply = handle_line(ctx, client, &line);
                if let Some(reply) = reply {
                    if let Err(e) = client.send(&reply) {
                        warn!("Failed to send to client {} ({}): {}", client.id(), client.peer(), e);
                        closed.push(index);
                        break;
                    }
                }
            }
            if outcome.closed && closed.last() != Some(&index) {
                closed.push(index);
            }
        }
        self.remove_clients(closed);
    }

    /// Broadcast queued monitor events to subscribed clients
    pub fn run_output(&mut self, ctx: &mut EngineContext) {
        ctx.collect_events();
        let events = ctx.events.drain();

        let mut failed = Vec::new();
        if !events.is_empty() && self.clients.iter().any(Connection::is_monitoring) {
            let args: Vec<JsonValue> = events
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect();
            let envelope = Envelope::new(reply::MONITOR).with_args(args);
            for (index, client) in self.clients.iter_mut().enumerate() {
                let result = if client.is_monitoring() {
                    client.send(&envelope)
                } else {
                    client.flush()
                };
                if let Err(e) = result {
                    warn!("Failed to send to client {} ({}): {}", client.id(), client.peer(), e);
                    failed.push(index);
                }
            }
        } else {
            for (index, client) in self.clients.iter_mut().enumerate() {
                if client.pending_output() > 0 && client.flush().is_err() {
                    failed.push(index);
                }
            }
        }
        self.remove_clients(failed);
    }

    /// Send `QUIT` to every client and close the listener
    pub fn shutdown(&mut self) {
        if self.listener.take().is_none() {
            return;
        }
        let quit = Envelope::new(reply::QUIT);
        for client in self.clients.drain(..) {
            debug!("Closing client {} ({})", client.id(), client.peer());
            client.close(Some(&quit));
        }
        info!("Control server on {} stopped", self.local_addr);
    }

    fn accept_connections(&mut self, ctx: &EngineContext) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let mut client = match Connection::new(id, stream, addr) {
                        Ok(client) => client,
                        Err(e) => {
                            error!("Failed to set up client from {}: {}", addr, e);
                            continue;
                        }
                    };
                    info!("Control client {} connected from {}", id, addr);

                    if let Err(e) = client.send(&lights(ctx)) {
                        warn!("Failed to greet client {} ({}): {}", id, addr, e);
                        continue;
                    }
                    self.clients.push(client);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    // Indices must be ascending.
    fn remove_clients(&mut self, indices: Vec<usize>) {
        for index in indices.into_iter().rev() {
            let client = self.clients.remove(index);
            info!("Control client {} ({}) disconnected", client.id(), client.peer());
            client.close(None);
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Descriptor sent to every new client
fn lights(ctx: &EngineContext) -> Envelope {
    Envelope::new(reply::LIGHTS)
        .with_args(ctx.fixtures.iter().map(|f| f.describe()).collect())
        .with_kwarg("suspended", ctx.suspended_names())
}

fn handle_line(ctx: &mut EngineContext, client: &mut Connection, line: &str) -> Option<Envelope> {
    let Some(request) = decode(line) else {
        warn!("Dropping malformed line from client {}: {}", client.id(), line);
        return None;
    };
    let reply = match request {
        Request::Reject {
            code,
            argument,
            message,
        } => Envelope::error(code, argument, message),
        Request::Command {
            command: Command::Monitor,
            args,
            ..
        } => {
            let monitor = args.first().and_then(JsonValue::as_bool).unwrap_or(true);
            client.set_monitoring(monitor);
            Envelope::new(reply::OK).with_kwarg("monitor", monitor)
        }
        Request::Command {
            command,
            args,
            kwargs,
        } => match dispatch_guarded(ctx, command, args, kwargs) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Client {} command {:?} failed: {}", client.id(), command, e.message);
                e.into_envelope()
            }
        },
    };
    Some(reply)
}
