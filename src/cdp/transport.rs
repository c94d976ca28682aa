//! CDP Transport Layer
//!
//! Talks to Chrome over a minimal WebSocket client on a plain `TcpStream`.
//! A reader thread correlates responses by id and forwards events.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

/// Events buffered before new ones are dropped
const EVENT_BUFFER: usize = 1024;

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;

/// Requests in flight, keyed by id, with the method for error reporting
type PendingMap = Arc<Mutex<HashMap<u64, (String, PendingRequest)>>>;

/// WebSocket message types
mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Build a masked client frame
fn encode_ws_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(0x80 | opcode);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    // Client frames are masked with a fresh key each time
    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

fn write_ws_frame(stream: &mut TcpStream, opcode: u8, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    stream.write_all(&encode_ws_frame(opcode, data))?;
    stream.flush()
}

/// Read a WebSocket frame, returns (opcode, payload)
fn read_ws_frame<R: std::io::Read>(stream: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let mut len = (header[1] & 0x7F) as usize;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext)?;
        len = u16::from_be_bytes(ext) as usize;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext)?;
        len = u64::from_be_bytes(ext) as usize;
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}

/// A parsed CDP message (response or event)
#[derive(Debug)]
pub enum CdpMessage {
    Response {
        id: u64,
        result: std::result::Result<Value, (i64, String)>,
    },
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

impl CdpMessage {
    /// Classify one text frame from Chrome
    pub fn parse(text: &str) -> Option<Self> {
        let msg: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse CDP message: {}", e);
                return None;
            }
        };

        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            let result = match msg.get("error") {
                Some(error) => Err((
                    error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                )),
                None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
            };
            return Some(CdpMessage::Response { id, result });
        }

        let method = msg.get("method").and_then(Value::as_str)?;
        Some(CdpMessage::Event {
            method: method.to_string(),
            params: msg.get("params").cloned().unwrap_or(json!({})),
            session_id: msg
                .get("sessionId")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

/// CDP Transport - sends commands and receives responses via WebSocket
pub struct Transport {
    child: Mutex<Child>,
    writer: Mutex<TcpStream>,
    next_id: AtomicU64,
    pending: PendingMap,
    event_rx: Mutex<mpsc::Receiver<CdpMessage>>,
}

impl Transport {
    /// Connect to Chrome's DevTools WebSocket
    pub fn new(child: Child, ws_url: &str) -> Result<Self> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, path) = url.split_once('/').unwrap_or((url, ""));

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET /{} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            path, host_port, key
        );

        use std::io::{Read, Write};
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        let mut response = [0u8; 1024];
        let n = stream
            .read(&mut response)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        let response_str = String::from_utf8_lossy(&response[..n]);
        if !response_str.contains("101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response_str
            )));
        }

        tracing::debug!("WebSocket connected to {}", ws_url);

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let pending_clone = Arc::clone(&pending);
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, pending_clone, event_tx);
        });

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending,
            event_rx: Mutex::new(event_rx),
        })
    }

    /// Runs on its own thread until the socket closes
    fn reader_loop(
        mut stream: TcpStream,
        pending: PendingMap,
        event_tx: mpsc::Sender<CdpMessage>,
    ) {
        loop {
            let (opcode, payload) = match read_ws_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let Ok(text) = String::from_utf8(payload) else {
                        continue;
                    };
                    match CdpMessage::parse(&text) {
                        Some(CdpMessage::Response { id, result }) => {
                            let entry = pending.blocking_lock().remove(&id);
                            match entry {
                                Some((method, sender)) => {
                                    let result = result
                                        .map_err(|(code, message)| Error::cdp(method, code, message));
                                    let _ = sender.send(result);
                                }
                                None => tracing::trace!("Response for unknown id: {}", id),
                            }
                        }
                        Some(event) => {
                            // Never block the reader: responses must keep flowing
                            if let Err(mpsc::error::TrySendError::Full(CdpMessage::Event {
                                method, ..
                            })) = event_tx.try_send(event)
                            {
                                tracing::trace!("Event buffer full, dropped {}", method);
                            }
                        }
                        None => {}
                    }
                }
                ws::OPCODE_PING => {
                    let _ = write_ws_frame(&mut stream, ws::OPCODE_PONG, &payload);
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        tracing::debug!("CDP reader loop ended");
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, mut msg: Value) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        msg["id"] = json!(id);

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, (method.to_string(), tx));

        let data = serde_json::to_string(&msg)?;
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_ws_frame(&mut writer, ws::OPCODE_TEXT, data.as_bytes()) {
                self.pending.lock().await.remove(&id);
                return Err(Error::transport_io("WebSocket write failed", e));
            }
        }

        tracing::trace!("Sent CDP command: {} (id={})", method, id);

        let result = rx
            .await
            .map_err(|_| Error::transport("Response channel closed"))??;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a browser-level CDP command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let msg = json!({
            "method": method,
            "params": serde_json::to_value(params)?,
        });
        self.request(method, msg).await
    }

    /// Send a CDP command to a specific session
    pub async fn send_to_session<C, R>(
        &self,
        session_id: &str,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let msg = json!({
            "method": method,
            "params": serde_json::to_value(params)?,
            "sessionId": session_id,
        });
        self.request(method, msg).await
    }

    /// Receive the next event from Chrome
    pub async fn recv_event(&self) -> Option<CdpMessage> {
        self.event_rx.lock().await.recv().await
    }

    /// Close the transport and kill Chrome
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = write_ws_frame(&mut writer, ws::OPCODE_CLOSE, &[]);
        }

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
        }
    }
}

/// Pull `ws://...` out of Chrome's "DevTools listening on" stderr line
fn devtools_url(line: &str) -> Option<&str> {
    if !line.contains("DevTools listening on") {
        return None;
    }
    line.find("ws://").map(|start| line[start..].trim())
}

/// Launch Chrome and get the WebSocket debugging URL
pub fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut child = Command::new(path)
        .args(args)
        .arg("--remote-debugging-port=0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to launch Chrome: {}", e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or(Error::Launch("No stderr from Chrome".into()))?;

    let mut ws_url = None;
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        tracing::trace!("Chrome stderr: {}", line);
        if let Some(url) = devtools_url(&line) {
            ws_url = Some(url.to_string());
            break;
        }
    }

    let ws_url = ws_url.ok_or(Error::Launch(
        "Failed to get DevTools WebSocket URL from Chrome".into(),
    ))?;

    tracing::info!("Chrome DevTools URL: {}", ws_url);
    Ok((child, ws_url))
}
