use core::convert::TryInto;
use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, Configuration};
use esp_idf_hal::gpio::{Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::{AnyIOPin, AnyOutputPin},
        modem::Modem,
        prelude::Peripherals,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use smart_switch_common::{
    config::{ButtonConfig, NetworkConfig},
    press_button,
    router::{request_head_complete, MAX_REQUEST_HEAD_BYTES, REQUEST_READ_TIMEOUT_MS},
    route,
    store::{check_offset, ERASED_BYTE, STORE_LEN},
    BootReport, ButtonDebouncer, ButtonEvent, NonVolatileStore, OutputError, OutputPolarity,
    RelayOutput, RelayState, RelaySwitch, Response, RuntimeConfig, StoreError,
};

const NVS_NAMESPACE: &str = "switch";
/// One key per store offset.
const NVS_KEYS: [&str; STORE_LEN] = ["relay_state", "boot_count"];
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const LOOP_IDLE_MS: u64 = 10;

type EspSwitch = RelaySwitch<NvsStore, GpioOutput>;

struct NvsStore {
    nvs: EspNvs<NvsDefault>,
    cache: [u8; STORE_LEN],
    dirty: [bool; STORE_LEN],
}

struct GpioOutput {
    gpio: i32,
    pin: PinDriver<'static, AnyOutputPin, Output>,
    polarity: OutputPolarity,
}

struct Button {
    gpio: i32,
    pin: PinDriver<'static, AnyIOPin, Input>,
    active_low: bool,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    apply_build_overrides(&mut runtime);
    runtime.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let store = NvsStore::open(nvs_partition.clone()).context("failed to open NVS store")?;
    let output = GpioOutput::new(runtime.pins.relay_pin, runtime.switch.polarity)?;
    let (mut switch, report) = RelaySwitch::boot(store, output, &runtime.switch)
        .context("cold start accounting failed")?;
    log_boot_report(&report);

    let button = runtime
        .pins
        .button_pin
        .and_then(|pin| Button::new(pin, &runtime.button));

    let wifi = start_access_point(modem, sys_loop, nvs_partition, &runtime.network)
        .context("access point startup failed")?;

    let addr: SocketAddr = ([0, 0, 0, 0], runtime.network.http_port).into();
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("failed to bind switch server at {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make listener non-blocking")?;
    info!("switch listening on http://{addr}");

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    if let Err(err) = add_current_task_to_watchdog() {
        warn!("failed to register main loop with watchdog: {err:#}");
    }

    // Keep the access point alive for the program lifetime.
    let _wifi = wifi;
    let mut debouncer = ButtonDebouncer::new(&runtime.button);

    loop {
        feed_watchdog();

        match listener.accept() {
            Ok((stream, peer)) => handle_connection(&mut switch, stream, peer),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => warn!("accept failed: {err}"),
        }

        if let Some(button) = button.as_ref() {
            if debouncer.poll(monotonic_ms(), button.is_pressed()) == Some(ButtonEvent::Pressed) {
                handle_button_press(&mut switch, button.gpio);
            }
        }

        thread::sleep(Duration::from_millis(LOOP_IDLE_MS));
    }
}

fn apply_build_overrides(runtime: &mut RuntimeConfig) {
    if let Some(ssid) = option_env!("SWITCH_AP_SSID") {
        runtime.network.ap_ssid = ssid.to_string();
    }

    if let Some(pass) = option_env!("SWITCH_AP_PASS") {
        runtime.network.ap_password = pass.to_string();
    }
}

fn handle_connection(switch: &mut EspSwitch, mut stream: TcpStream, peer: SocketAddr) {
    info!("client connected: {peer}");

    let request = match read_request_head(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!("failed to prepare client socket: {err}");
            return;
        }
    };
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

    if let Err(err) = stream.write_all(&response.to_http_bytes()) {
        warn!("failed to write response to {peer}: {err}");
    }
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
    info!("client disconnected: {peer}");
}

/// Reads until the blank line, the size cap, EOF, or the deadline; whatever
/// arrived is returned.
fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(REQUEST_READ_TIMEOUT_MS)))?;

    let deadline = Instant::now() + Duration::from_millis(REQUEST_READ_TIMEOUT_MS);
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0_u8; 512];

    while !request_head_complete(&buf) && Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("request read stopped: {err}");
                break;
            }
        }
    }

    buf.truncate(MAX_REQUEST_HEAD_BYTES);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn handle_button_press(switch: &mut EspSwitch, gpio: i32) {
    match press_button(switch) {
        Ok(_) => info!(
            "button on GPIO{gpio} toggled relay {}",
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

fn start_access_point(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.ap_password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: network
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point ssid too long"))?,
        password: network
            .ap_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point password too long"))?,
        auth_method,
        channel: network.ap_channel,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    let ip = wifi.wifi().ap_netif().get_ip_info()?.ip;
    info!("access point `{}` started at {ip}", network.ap_ssid);
    Ok(esp_wifi)
}

impl NvsStore {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;

        let mut cache = [ERASED_BYTE; STORE_LEN];
        for (slot, key) in cache.iter_mut().zip(NVS_KEYS) {
            if let Some(value) = nvs.get_u8(key)? {
                *slot = value;
            }
        }

        Ok(Self {
            nvs,
            cache,
            dirty: [false; STORE_LEN],
        })
    }
}

impl NonVolatileStore for NvsStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError> {
        check_offset(offset)?;
        Ok(self.cache[offset])
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        check_offset(offset)?;
        self.cache[offset] = value;
        self.dirty[offset] = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        for offset in 0..STORE_LEN {
            if !self.dirty[offset] {
                continue;
            }
            let key = NVS_KEYS[offset];
            self.nvs
                .set_u8(key, self.cache[offset])
                .map_err(|err| StoreError::Backend(format!("nvs `{key}`: {err}")))?;
            self.dirty[offset] = false;
            debug!("nvs `{key}` <- {}", self.cache[offset]);
        }
        Ok(())
    }
}

impl GpioOutput {
    fn new(gpio: i32, polarity: OutputPolarity) -> anyhow::Result<Self> {
        let pin = unsafe { PinDriver::output(AnyOutputPin::new(gpio)) }
            .with_context(|| format!("relay output unavailable on GPIO{gpio}"))?;
        Ok(Self {
            gpio,
            pin,
            polarity,
        })
    }
}

impl RelayOutput for GpioOutput {
    fn drive(&mut self, state: RelayState) -> Result<(), OutputError> {
        let result = if self.polarity.drive_high(state) {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|err| OutputError(format!("GPIO{}: {err}", self.gpio)))
    }
}

impl Button {
    fn new(gpio: i32, config: &ButtonConfig) -> Option<Self> {
        let driver = unsafe { PinDriver::input(AnyIOPin::new(gpio)) };
        match driver {
            Ok(mut pin) => {
                let pull = if config.active_low {
                    Pull::Up
                } else {
                    Pull::Down
                };
                if let Err(err) = pin.set_pull(pull) {
                    warn!("failed to set pull on button GPIO{gpio}: {err}");
                }
                Some(Self {
                    gpio,
                    pin,
                    active_low: config.active_low,
                })
            }
            Err(err) => {
                warn!("button unavailable on GPIO{gpio}: {err}");
                None
            }
        }
    }

    fn is_pressed(&self) -> bool {
        if self.active_low {
            self.pin.is_low()
        } else {
            self.pin.is_high()
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
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
