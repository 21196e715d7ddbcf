// SPDX-License-Identifier: CC0-1.0

//! An in-process, scripted stand-in for an Electrum server, for exercising
//! the transport/provider/wallet stack end to end without a real node.
//!
//! Binds an ephemeral localhost port, accepts a single connection, and
//! answers whatever methods the test has registered with [`MockElectrumServer::on`]
//! or [`MockElectrumServer::on_const`]. Tests can also push unsolicited
//! notifications (`blockchain.headers.subscribe` / `blockchain.scripthash.subscribe`
//! style pushes) with [`MockElectrumServer::push_notification`] at any time.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

type Handler = Box<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A scripted, single-connection Electrum server.
pub struct MockElectrumServer {
    port: u16,
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl MockElectrumServer {
    /// Binds an ephemeral localhost port and starts accepting a single
    /// connection on a background thread.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();
        let handlers: Arc<Mutex<HashMap<String, Handler>>> = Arc::new(Mutex::new(HashMap::new()));
        let stream: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));

        let handlers_bg = Arc::clone(&handlers);
        let stream_bg = Arc::clone(&stream);
        thread::spawn(move || {
            let Ok((conn, _)) = listener.accept() else { return };
            *stream_bg.lock().unwrap() = Some(conn.try_clone().expect("clone accepted stream"));
            serve(conn, &handlers_bg, &stream_bg);
        });

        MockElectrumServer { port, handlers, stream }
    }

    /// The ephemeral port the server accepted a connection on.
    pub fn port(&self) -> u16 { self.port }

    /// Registers (or replaces) the scripted response for `method`.
    pub fn on(&self, method: &str, handler: impl Fn(&[Value]) -> Value + Send + Sync + 'static) {
        self.handlers.lock().unwrap().insert(method.to_string(), Box::new(handler));
    }

    /// Registers a scripted response that ignores params and always returns `result`.
    pub fn on_const(&self, method: &str, result: Value) {
        self.on(method, move |_| result.clone());
    }

    /// Pushes an unsolicited JSON-RPC notification to the connected client,
    /// waiting briefly for the accept thread to have a connection ready.
    pub fn push_notification(&self, method: &str, params: Value) {
        let frame = serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params});
        for _ in 0..200 {
            if let Some(conn) = self.stream.lock().unwrap().as_mut() {
                let _ = writeln!(conn, "{}", frame);
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        log::warn!(target: "electrum_test_util", "push_notification({}) timed out waiting for a connection", method);
    }
}

fn serve(conn: TcpStream, handlers: &Arc<Mutex<HashMap<String, Handler>>>, stream: &Arc<Mutex<Option<TcpStream>>>) {
    let mut reader = BufReader::new(conn);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        let Ok(request) = serde_json::from_str::<Value>(trimmed) else { continue };
        let Some(id) = request.get("id").cloned() else { continue };
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params: Vec<Value> = request.get("params").and_then(Value::as_array).cloned().unwrap_or_default();

        let result = handlers.lock().unwrap().get(method).map(|h| h(&params));
        let response = match result {
            Some(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
            None => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"message": format!("no scripted response for {}", method)},
            }),
        };

        let mut guard = stream.lock().unwrap();
        if let Some(conn) = guard.as_mut() {
            if writeln!(conn, "{}", response).is_err() {
                break;
            }
        }
    }
}
