use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    signal::unix::{signal, SignalKind},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use smart_switch_common::{
    press_button,
    router::{request_head_complete, MAX_REQUEST_HEAD_BYTES, REQUEST_READ_TIMEOUT_MS},
    route,
    store::{check_offset, ERASED_BYTE, STORE_LEN},
    BootReport, ButtonDebouncer, ButtonEvent, NonVolatileStore, OutputError, OutputPolarity,
    RelayOutput, RelayState, RelaySwitch, Response, RuntimeConfig, StoreError,
};

const BUTTON_POLL_MS: u64 = 10;
const SIMULATED_PRESS_MARGIN_MS: u64 = 30;

type HostSwitch = RelaySwitch<FileStore, LoggingOutput>;

/// EEPROM emulation backed by a small file; writes land in `cache` until
/// `commit`.
#[derive(Debug)]
struct FileStore {
    path: PathBuf,
    cache: [u8; STORE_LEN],
}

/// Stand-in for the relay GPIO: logs the line level it would drive.
#[derive(Debug)]
struct LoggingOutput {
    polarity: OutputPolarity,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("SWITCH_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.smart-switch"));

    let mut runtime = load_runtime_config(&data_dir.join("config.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    if let Some(port) = std::env::var("SWITCH_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.http_port = port;
    }
    runtime.sanitize();

    let store = FileStore::open(data_dir.join("eeprom.bin"))?;
    let output = LoggingOutput {
        polarity: runtime.switch.polarity,
    };
    let (mut switch, report) = RelaySwitch::boot(store, output, &runtime.switch)
        .context("cold start accounting failed")?;
    log_boot_report(&report);

    let addr: SocketAddr = ([0, 0, 0, 0], runtime.network.http_port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind switch server at {addr}"))?;
    info!("switch listening on http://{addr}");

    let mut press_signal =
        signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    info!("send SIGUSR1 to simulate a button press");

    let mut debouncer = ButtonDebouncer::new(&runtime.button);
    let press_hold_ms = runtime.button.debounce_ms + SIMULATED_PRESS_MARGIN_MS;
    let mut pressed_until_ms: Option<u64> = None;

    let mut button_tick = tokio::time::interval(Duration::from_millis(BUTTON_POLL_MS));
    button_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => handle_connection(&mut switch, stream, peer).await,
                Err(err) => warn!("accept failed: {err}"),
            },
            _ = button_tick.tick() => {
                let now_ms = monotonic_ms();
                let pressed = pressed_until_ms.is_some_and(|until| now_ms < until);
                if debouncer.poll(now_ms, pressed) == Some(ButtonEvent::Pressed) {
                    handle_button_press(&mut switch);
                }
            }
            _ = press_signal.recv() => {
                pressed_until_ms = Some(monotonic_ms() + press_hold_ms);
            }
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(switch: &mut HostSwitch, mut stream: TcpStream, peer: SocketAddr) {
    info!("client connected: {peer}");

    let request = read_request_head(&mut stream).await;
    if let Some(line) = request.lines().next() {
        info!("request: {line}");
    }

    let response = match route(switch, &request) {
        Ok((command, response)) => {
            debug!("handled {command:?}, relay {}", switch.current_state().as_str());
            response
        }
        Err(err) => {
            warn!("relay command not persisted: {err}");
            Response::persistence_failure()
        }
    };

    if let Err(err) = stream.write_all(&response.to_http_bytes()).await {
        warn!("failed to write response to {peer}: {err}");
    }
    let _ = stream.shutdown().await;
    info!("client disconnected: {peer}");
}

/// Reads until the blank line, the size cap, EOF, or the deadline; whatever
/// arrived is returned.
async fn read_request_head(stream: &mut TcpStream) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(REQUEST_READ_TIMEOUT_MS);
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0_u8; 512];

    while !request_head_complete(&buf) {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(err)) => {
                warn!("request read failed: {err}");
                break;
            }
            Err(_) => {
                warn!("request read timed out after {REQUEST_READ_TIMEOUT_MS}ms");
                break;
            }
        }
    }

    buf.truncate(MAX_REQUEST_HEAD_BYTES);
    String::from_utf8_lossy(&buf).into_owned()
}

fn handle_button_press(switch: &mut HostSwitch) {
    match press_button(switch) {
        Ok(_) => info!(
            "button press toggled relay {}",
            switch.current_state().as_str()
        ),
        Err(err) => warn!("button toggle not persisted: {err}"),
    }
}

fn log_boot_report(report: &BootReport) {
    if let Some(raw) = report.corrupt_relay_byte {
        warn!(
            "stored relay byte {raw:#04x} invalid; using {}",
            report.relay_state.as_str()
        );
    }
    if let Some(raw) = report.corrupt_boot_count {
        warn!("stored boot count {raw} out of range; treating store as fresh");
    }
    if report.forced_safe_default {
        warn!(
            "boot loop detected; relay forced {} and boot count reset",
            report.relay_state.as_str()
        );
    } else {
        info!(
            "cold start #{}: relay {}",
            report.boot_count,
            report.relay_state.as_str()
        );
    }
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(RuntimeConfig::from_json(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

impl FileStore {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let mut cache = [ERASED_BYTE; STORE_LEN];
        match std::fs::read(&path) {
            Ok(raw) => {
                for (slot, byte) in cache.iter_mut().zip(raw) {
                    *slot = byte;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no store at {}; starting erased", path.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }

        Ok(Self { path, cache })
    }

    fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, self.cache)?;
        std::fs::rename(&staging, &self.path)
    }
}

impl NonVolatileStore for FileStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError> {
        check_offset(offset)?;
        Ok(self.cache[offset])
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        check_offset(offset)?;
        debug!("store[{offset}] <- {value}");
        self.cache[offset] = value;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.persist()
            .map_err(|err| StoreError::Backend(format!("{}: {err}", self.path.display())))
    }
}

impl RelayOutput for LoggingOutput {
    fn drive(&mut self, state: RelayState) -> Result<(), OutputError> {
        let level = if self.polarity.drive_high(state) {
            "HIGH"
        } else {
            "LOW"
        };
        info!("relay {} (line {level})", state.as_str());
        Ok(())
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
