//! In-process SAM bridge speaking just enough of the protocol for the
//! integration suites. Every command line it reads is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sam_client::utils::i2p_base64_encode;
use sam_client::{Destination, SamConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Public destination bytes: Ed25519 key certificate, keys filled with `seed`.
pub fn public_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = vec![seed; 384];
    bytes.extend_from_slice(&[5, 0, 4, 0, 7, 0, 0]);
    bytes
}

pub fn private_blob(seed: u8) -> String {
    let mut bytes = public_bytes(seed);
    bytes.extend_from_slice(&[seed ^ 0xFF; 288]);
    i2p_base64_encode(&bytes)
}

pub fn public_b64(seed: u8) -> String {
    i2p_base64_encode(&public_bytes(seed))
}

pub fn destination(seed: u8) -> Destination {
    Destination::from_base64(&public_b64(seed)).unwrap()
}

/// Seed of the peer announced to accepted streams.
pub const PEER_SEED: u8 = 200;

#[derive(Debug, Clone)]
pub struct RouterBehavior {
    pub reject_hello: bool,
    /// Pause between `STREAM STATUS` and the peer line on accepts.
    pub accept_delay: Duration,
    pub remove_reply: RemoveReply,
}

impl Default for RouterBehavior {
    fn default() -> Self {
        Self {
            reject_hello: false,
            accept_delay: Duration::from_millis(50),
            remove_reply: RemoveReply::Prompt,
        }
    }
}

/// How the router answers `SESSION REMOVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReply {
    Prompt,
    Late(Duration),
    Never,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    style: String,
    conn: usize,
    seed: u8,
    udp_target: Option<SocketAddr>,
    raw_header: bool,
}

#[derive(Default)]
struct RouterState {
    log: Mutex<Vec<String>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_conn: AtomicUsize,
    next_seed: AtomicUsize,
    active_accepts: AtomicUsize,
    max_accepts: AtomicUsize,
}

pub struct MockRouter {
    addr: SocketAddr,
    state: Arc<RouterState>,
    task: JoinHandle<()>,
}

impl MockRouter {
    pub async fn start() -> Self {
        Self::with_behavior(RouterBehavior::default()).await
    }

    pub async fn with_behavior(behavior: RouterBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RouterState::default());
        state.next_seed.store(1, Ordering::SeqCst);
        let behavior = Arc::new(behavior);

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = state.clone();
                    let behavior = behavior.clone();
                    tokio::spawn(serve(stream, state, behavior));
                }
            })
        };

        Self { addr, state, task }
    }

    pub fn config(&self) -> SamConfig {
        SamConfig {
            command_timeout: Duration::from_secs(5),
            ..SamConfig::new("127.0.0.1", self.addr.port())
        }
    }

    /// Every line received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state.sessions.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn max_concurrent_accepts(&self) -> usize {
        self.state.max_accepts.load(Ordering::SeqCst)
    }
}

impl Drop for MockRouter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse_fields(line: &str) -> (Vec<&str>, BTreeMap<&str, &str>) {
    let mut words = Vec::new();
    let mut fields = BTreeMap::new();
    for token in line.split_whitespace() {
        match token.split_once('=') {
            Some((k, v)) if !words.is_empty() => {
                fields.insert(k, v);
            }
            _ => words.push(token),
        }
    }
    (words, fields)
}

async fn reply(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{line}\n").as_bytes()).await
}

async fn serve(stream: TcpStream, state: Arc<RouterState>, behavior: Arc<RouterBehavior>) {
    let conn = state.next_conn.fetch_add(1, Ordering::SeqCst);
    let (read, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read);

    let _ = handle(conn, &mut reader, &mut writer, &state, &behavior).await;

    // Sessions die with the control connection that created them.
    state.sessions.lock().unwrap().retain(|_, s| s.conn != conn);
}

async fn handle(
    conn: usize,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    state: &Arc<RouterState>,
    behavior: &RouterBehavior,
) -> std::io::Result<()> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        state.log.lock().unwrap().push(line.clone());
        let (words, fields) = parse_fields(&line);

        match (words.first().copied(), words.get(1).copied()) {
            (Some("HELLO"), Some("VERSION")) => {
                if behavior.reject_hello {
                    reply(writer, "HELLO REPLY RESULT=NOVERSION").await?;
                    return Ok(());
                }
                reply(writer, "HELLO REPLY RESULT=OK VERSION=3.3").await?;
            }
            (Some("SESSION"), Some("CREATE")) => {
                let id = fields.get("ID").copied().unwrap_or_default().to_string();
                let response = {
                    let mut sessions = state.sessions.lock().unwrap();
                    if sessions.contains_key(&id) {
                        "SESSION STATUS RESULT=DUPLICATED_ID".to_string()
                    } else {
                        let seed = state.next_seed.fetch_add(1, Ordering::SeqCst) as u8;
                        sessions.insert(id, session_entry(conn, seed, &fields));
                        format!("SESSION STATUS RESULT=OK DESTINATION={}", private_blob(seed))
                    }
                };
                reply(writer, &response).await?;
            }
            (Some("SESSION"), Some("ADD")) => {
                let id = fields.get("ID").copied().unwrap_or_default().to_string();
                let response = {
                    let mut sessions = state.sessions.lock().unwrap();
                    let primary = sessions
                        .values()
                        .find(|s| s.conn == conn && s.style == "PRIMARY")
                        .cloned();
                    match primary {
                        None => "SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"no primary session\"".to_string(),
                        Some(_) if sessions.contains_key(&id) => {
                            "SESSION STATUS RESULT=DUPLICATED_ID".to_string()
                        }
                        Some(primary) => {
                            sessions.insert(id.clone(), session_entry(conn, primary.seed, &fields));
                            format!("SESSION STATUS RESULT=OK ID={id} MESSAGE=ADD")
                        }
                    }
                };
                reply(writer, &response).await?;
            }
            (Some("SESSION"), Some("REMOVE")) => {
                let id = fields.get("ID").copied().unwrap_or_default();
                let removed = state.sessions.lock().unwrap().remove(id).is_some();
                let result = if removed { "OK" } else { "INVALID_ID" };
                match behavior.remove_reply {
                    RemoveReply::Prompt => {}
                    RemoveReply::Late(delay) => tokio::time::sleep(delay).await,
                    RemoveReply::Never => continue,
                }
                reply(writer, &format!("SESSION STATUS RESULT={result} ID={id}")).await?;
            }
            (Some("STREAM"), Some("CONNECT")) => {
                let id = fields.get("ID").copied().unwrap_or_default();
                let dest = fields.get("DESTINATION").copied().unwrap_or_default();
                if !state.sessions.lock().unwrap().contains_key(id) {
                    reply(writer, "STREAM STATUS RESULT=INVALID_ID").await?;
                    return Ok(());
                }
                match dest {
                    "UNREACHABLE" => {
                        reply(writer, "STREAM STATUS RESULT=CANT_REACH_PEER MESSAGE=\"peer is gone\"")
                            .await?;
                        return Ok(());
                    }
                    "SLOW" => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return Ok(());
                    }
                    _ => {}
                }
                reply(writer, "STREAM STATUS RESULT=OK").await?;
                tokio::io::copy(reader, writer).await?;
                return Ok(());
            }
            (Some("STREAM"), Some("ACCEPT")) => {
                let id = fields.get("ID").copied().unwrap_or_default();
                if !state.sessions.lock().unwrap().contains_key(id) {
                    reply(writer, "STREAM STATUS RESULT=INVALID_ID").await?;
                    return Ok(());
                }
                let active = state.active_accepts.fetch_add(1, Ordering::SeqCst) + 1;
                state.max_accepts.fetch_max(active, Ordering::SeqCst);

                reply(writer, "STREAM STATUS RESULT=OK").await?;
                tokio::time::sleep(behavior.accept_delay).await;
                let peer_line = format!("{} FROM_PORT=1234 TO_PORT=80", public_b64(PEER_SEED));
                let sent = reply(writer, &peer_line).await;
                state.active_accepts.fetch_sub(1, Ordering::SeqCst);
                sent?;

                tokio::io::copy(reader, writer).await?;
                return Ok(());
            }
            (Some(topic @ ("DATAGRAM" | "RAW")), Some("SEND")) => {
                let size: usize = fields.get("SIZE").and_then(|s| s.parse().ok()).unwrap_or(0);
                let mut payload = vec![0u8; size];
                reader.read_exact(&mut payload).await?;

                let id = fields.get("ID").copied().unwrap_or_default();
                let entry = state.sessions.lock().unwrap().get(id).cloned();
                if let Some(entry) = entry {
                    forward(&entry, topic, &payload).await?;
                }
            }
            (Some("NAMING"), Some("LOOKUP")) => {
                let name = fields.get("NAME").copied().unwrap_or_default();
                if name == "stall" {
                    continue;
                }
                let value = lookup(conn, name, state);
                let response = match value {
                    Some(value) => format!("NAMING REPLY RESULT=OK NAME={name} VALUE={value}"),
                    None => format!("NAMING REPLY RESULT=KEY_NOT_FOUND NAME={name}"),
                };
                reply(writer, &response).await?;
            }
            (Some("DEST"), Some("GENERATE")) => {
                let seed = state.next_seed.fetch_add(1, Ordering::SeqCst) as u8;
                let response = format!(
                    "DEST REPLY PUB={} PRIV={}",
                    public_b64(seed),
                    private_blob(seed)
                );
                reply(writer, &response).await?;
            }
            _ => {
                reply(writer, "ERROR RESULT=I2P_ERROR MESSAGE=\"unknown command\"").await?;
            }
        }
    }
}

fn session_entry(conn: usize, seed: u8, fields: &BTreeMap<&str, &str>) -> SessionEntry {
    let udp_target = match (fields.get("HOST"), fields.get("PORT")) {
        (Some(host), Some(port)) => format!("{host}:{port}").parse().ok(),
        _ => None,
    };
    SessionEntry {
        style: fields.get("STYLE").copied().unwrap_or_default().to_string(),
        conn,
        seed,
        udp_target,
        raw_header: fields.get("HEADER") == Some(&"true"),
    }
}

/// `ME`, `echo-<seed>`, or the `.b32.i2p` address of any known session.
fn lookup(conn: usize, name: &str, state: &RouterState) -> Option<String> {
    if let Some(seed) = name.strip_prefix("echo-") {
        return seed.parse::<u8>().ok().map(public_b64);
    }
    let sessions = state.sessions.lock().unwrap();
    if name == "ME" {
        return sessions
            .values()
            .find(|s| s.conn == conn)
            .map(|s| public_b64(s.seed));
    }
    sessions
        .values()
        .map(|s| destination(s.seed))
        .find(|d| d.b32_address() == name)
        .map(|d| d.to_base64().to_string())
}

/// Echo an outbound datagram back to the sending session's forwarding port.
async fn forward(entry: &SessionEntry, topic: &str, payload: &[u8]) -> std::io::Result<()> {
    let Some(target) = entry.udp_target else {
        return Ok(());
    };
    let sender = destination(entry.seed);

    let mut packet = match (topic, entry.style.as_str()) {
        ("RAW", _) if entry.raw_header => b"FROM_PORT=0 TO_PORT=0 PROTOCOL=18\n".to_vec(),
        ("RAW", _) => Vec::new(),
        (_, "DATAGRAM3") => format!("{} FROM_PORT=0 TO_PORT=0\n", sender.hash().to_base64()).into_bytes(),
        _ => format!("{} FROM_PORT=0 TO_PORT=0\n", sender.to_base64()).into_bytes(),
    };
    packet.extend_from_slice(payload);

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(&packet, target).await?;
    Ok(())
}
