//! Scripted WMP gateway on a local TCP port
//!
//! Answers `ID`, `INFO`, `PING`, `GET,1:*` (register dump closed by `ERRCODE`) and
//! optionally acknowledges `SET`/`LIMITS`. Every received line is recorded
//! with its arrival time.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const IDENTIFY_PAYLOAD: &str = "FJ-RC-WMP-1,CC:3F:1D:01:AB:23,127.0.0.1,ASCII,v1.3.3,-55,living-room,N";

struct DeviceState {
    registers: Mutex<Vec<(String, String)>>,
    received: Mutex<Vec<(Instant, String)>>,
    connections: AtomicUsize,
    acknowledge: AtomicBool,
    kick: broadcast::Sender<()>,
}

impl DeviceState {
    fn respond(&self, line: &str) -> Vec<String> {
        let upper = line.to_ascii_uppercase();
        if upper == "ID" {
            vec![format!("ID:{IDENTIFY_PAYLOAD}")]
        } else if upper == "INFO" {
            vec![
                "INFO:RUNVERSION,1.3.3".to_string(),
                "INFO:CFGVERSION,2.0".to_string(),
            ]
        } else if upper == "PING" {
            vec!["PONG".to_string()]
        } else if upper.starts_with("GET,1:") {
            let mut lines: Vec<String> = self
                .registers
                .lock()
                .iter()
                .map(|(name, value)| format!("CHN,1:{name},{value}"))
                .collect();
            lines.push("CHN,1:ERRCODE,0".to_string());
            lines
        } else if (upper.starts_with("SET,") || upper.starts_with("LIMITS:"))
            && self.acknowledge.load(Ordering::SeqCst)
        {
            vec!["ACK".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Fake gateway accepting any number of connections
pub struct FakeWmpDevice {
    addr: SocketAddr,
    state: Arc<DeviceState>,
    accept_task: JoinHandle<()>,
}

impl FakeWmpDevice {
    pub async fn start(registers: &[(&str, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kick, _) = broadcast::channel(4);

        let state = Arc::new(DeviceState {
            registers: Mutex::new(
                registers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
            ),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            acknowledge: AtomicBool::new(true),
            kick,
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let kick = accept_state.kick.subscribe();
                tokio::spawn(serve(socket, Arc::clone(&accept_state), kick));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of accepted connections so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Lines received, in order
    pub fn received(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Lines received with their arrival time
    pub fn received_at(&self) -> Vec<(Instant, String)> {
        self.state.received.lock().clone()
    }

    /// How many times `line` has been received
    pub fn count(&self, line: &str) -> usize {
        self.state
            .received
            .lock()
            .iter()
            .filter(|(_, l)| l == line)
            .count()
    }

    /// Wait until `line` has been received
    pub async fn wait_for_line(&self, line: &str, within: std::time::Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.received().iter().any(|l| l == line) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    pub fn set_register(&self, name: &str, value: &str) {
        let mut registers = self.state.registers.lock();
        match registers.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => registers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.acknowledge.store(acknowledge, Ordering::SeqCst);
    }

    /// Close every open client connection
    pub fn drop_connections(&self) {
        let _ = self.state.kick.send(());
    }
}

impl Drop for FakeWmpDevice {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.state.kick.send(());
    }
}

async fn serve(socket: TcpStream, state: Arc<DeviceState>, mut kick: broadcast::Receiver<()>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = kick.recv() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };

        let line = line.trim_end_matches('\r').to_string();
        state.received.lock().push((Instant::now(), line.clone()));

        for reply in state.respond(&line) {
            if write_half
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }
    }
}
