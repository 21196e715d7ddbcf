// SPDX-License-Identifier: CC0-1.0

//! C1: a single persistent TCP connection speaking newline-delimited
//! JSON-RPC, multiplexing in-flight requests by id and routing subscription
//! pushes to an event sink.
//!
//! Realised here as a writer owned by the caller's thread plus a background
//! reader thread draining the socket; the pending-request table is the only
//! state shared between them, guarded by a `Mutex`. Worker threads with a
//! synchronized pending-request table, rather than a cooperative task
//! system.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::Value;

use crate::error::Error;
use crate::wire::{Decoded, Frame, Request};
use crate::Result;

/// Connection lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// No socket, no connection attempt in flight.
    Disconnected,
    /// `connect()` has been called, the socket is being established.
    Connecting,
    /// The socket is open and the reader thread is running.
    Connected,
    /// The connection failed or dropped unexpectedly; call `reconnect()`.
    Error,
    /// `close()` was called; this transport will never connect again.
    Destroyed,
}

/// Observable events the transport emits.
pub enum Event {
    /// A status transition, `(previous, new)`.
    Status(Status, Status),
    /// A decoded subscription push, not yet interpreted by the provider.
    Notification {
        /// The `.subscribe`-suffixed method name the push arrived on.
        method: String,
        /// The push's `params`.
        params: Value,
    },
    /// A frame arrived that could not be matched to a pending request or a
    /// known notification method; logged and dropped, not fatal.
    RequestError(String),
}

/// A sink for transport events; typically the provider's dispatcher.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

struct Pending {
    #[allow(dead_code)] // kept for diagnostics/logging symmetry with the demux rules
    method: String,
    reply: mpsc::SyncSender<std::result::Result<Value, Value>>,
}

struct Shared {
    status: Mutex<Status>,
    writer: Mutex<Option<TcpStream>>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<(String, Vec<Value>)>>,
    sink: EventSink,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A persistent connection to `(host, port)`.
pub struct Transport {
    host: String,
    port: u16,
    shared: Arc<Shared>,
}

impl Transport {
    /// Creates a transport in the `DISCONNECTED` state. Call [`Transport::connect`] to dial.
    pub fn new(host: impl Into<String>, port: u16, sink: EventSink) -> Self {
        Transport {
            host: host.into(),
            port,
            shared: Arc::new(Shared {
                status: Mutex::new(Status::Disconnected),
                writer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                subscriptions: Mutex::new(Vec::new()),
                sink,
                reader: Mutex::new(None),
            }),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> Status { *self.shared.status.lock().unwrap() }

    fn set_status(&self, new: Status) {
        let prev = {
            let mut guard = self.shared.status.lock().unwrap();
            let prev = *guard;
            *guard = new;
            prev
        };
        if prev != new {
            (self.shared.sink)(Event::Status(prev, new));
        }
    }

    /// Dials the socket and starts the reader thread.
    ///
    /// Transitions `DISCONNECTED | ERROR -> CONNECTING -> CONNECTED`.
    pub fn connect(&self) -> Result<()> {
        self.set_status(Status::Connecting);
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        let reader_stream = stream.try_clone()?;
        *self.shared.writer.lock().unwrap() = Some(stream);

        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || read_loop(shared, reader_stream));
        *self.shared.reader.lock().unwrap() = Some(handle);

        self.set_status(Status::Connected);
        log::debug!(target: "electrum::transport", "connected to {}:{}", self.host, self.port);
        Ok(())
    }

    /// Closes the existing socket and establishes a new one, re-issuing every
    /// subscription previously registered through [`Transport::subscribe`].
    ///
    /// In-flight requests at the time of disconnect are failed with `Transport`.
    pub fn reconnect(&self) -> Result<()> {
        self.fail_all_pending();
        *self.shared.writer.lock().unwrap() = None;
        self.set_status(Status::Disconnected);
        self.connect()?;

        let subs = self.shared.subscriptions.lock().unwrap().clone();
        for (method, params) in subs {
            if let Err(e) = self.call(&method, &params) {
                log::warn!(target: "electrum::transport", "failed to re-subscribe {}: {:?}", method, e);
            }
        }
        Ok(())
    }

    fn fail_all_pending(&self) {
        let mut pending = self.shared.pending.lock().unwrap();
        for (_, entry) in pending.drain() {
            // The receiver only sees a JSON error shape, so encode the
            // disconnect as a recognisable synthetic error object.
            let _ = entry.reply.send(Err(serde_json::json!({"transport": "disconnected"})));
        }
    }

    /// Sends `method(params)` and blocks for the matching reply.
    pub fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        if self.status() != Status::Connected {
            return Err(Error::NotConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::sync_channel(1);
        self.shared.pending.lock().unwrap().insert(id, Pending { method: method.to_string(), reply: tx });

        let request = Request::new(id, method, params);
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        log::trace!(target: "electrum::transport", "request: {} {:?}", method, params);
        {
            let mut guard = self.shared.writer.lock().unwrap();
            let stream = guard.as_mut().ok_or(Error::NotConnected)?;
            stream.write_all(&line)?;
        }

        match rx.recv() {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(payload)) => {
                Err(Error::RpcRemote { method: method.to_string(), payload })
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Like [`Transport::call`], but additionally records `(method, params)`
    /// so a future [`Transport::reconnect`] re-issues it.
    pub fn subscribe(&self, method: &str, params: &[Value]) -> Result<Value> {
        let result = self.call(method, params)?;
        self.shared.subscriptions.lock().unwrap().push((method.to_string(), params.to_vec()));
        Ok(result)
    }

    /// Transitions to `DESTROYED` and closes the socket. Idempotent.
    pub fn close(&self) {
        *self.shared.writer.lock().unwrap() = None;
        self.fail_all_pending();
        self.set_status(Status::Destroyed);
    }
}

fn read_loop(shared: Arc<Shared>, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                handle_frame(&shared, trimmed);
            }
            Err(e) => {
                log::warn!(target: "electrum::transport", "read error: {}", e);
                break;
            }
        }
    }

    let mut status = shared.status.lock().unwrap();
    if *status != Status::Destroyed {
        let prev = *status;
        *status = Status::Error;
        drop(status);
        (shared.sink)(Event::Status(prev, Status::Error));
        for (_, entry) in shared.pending.lock().unwrap().drain() {
            let _ = entry.reply.send(Err(serde_json::json!({"transport": "closed"})));
        }
    }
}

fn handle_frame(shared: &Arc<Shared>, line: &str) {
    let frame: Frame = match serde_json::from_str(line) {
        Ok(f) => f,
        Err(e) => {
            (shared.sink)(Event::RequestError(format!("decode error: {}", e)));
            return;
        }
    };

    match frame.decode() {
        Decoded::Notification { method, params } => {
            (shared.sink)(Event::Notification { method, params });
        }
        Decoded::Reply { id, result } => {
            let entry = shared.pending.lock().unwrap().remove(&id);
            match entry {
                Some(entry) => {
                    let _ = entry.reply.send(result);
                }
                None => {
                    (shared.sink)(Event::RequestError(format!("no pending request for id {}", id)));
                }
            }
        }
        Decoded::Malformed => {
            (shared.sink)(Event::RequestError(format!("malformed frame: {}", line)));
        }
    }
}
