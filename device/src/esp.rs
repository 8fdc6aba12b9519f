use core::convert::TryInto;
use std::{
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use dht_sensor::dht11;
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
    ws::FrameType,
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, Gpio1, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{
        ws::{EspHttpWsConnection, EspHttpWsDetachedSender},
        Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sys::{EspError, ESP_ERR_INVALID_SIZE},
    wifi::EspWifi,
};
use log::{error, info, warn};
use serde::Serialize;

use sensorhub_common::{
    monotonic_ms, sensor_feed, ClimateProducer, DeviceService, KvStore, LightProducer,
    NetworkError, NetworkLink, Page, RawAccessPoint, Rgb, ServiceConfig, StationInfo, StoreError,
    SystemClock,
};

use crate::{
    control::{self, Outputs, ServiceRequest},
    neopixel::NeoPixel,
};

const NVS_NAMESPACE: &str = "sensorhub";
const NVS_STRING_CAPACITY: usize = 128;
const DHT11_PIN: i32 = 4;
const CLIMATE_PERIOD: Duration = Duration::from_secs(5);
const LIGHT_PERIOD: Duration = Duration::from_secs(2);
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const INDEX_HTML: &str = include_str!("../web/index.html");

struct NvsKvStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsKvStore {
    fn open(partition: EspDefaultNvsPartition) -> Result<Self, StoreError> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true).map_err(|err| {
            StoreError::Unavailable(format!("nvs namespace `{NVS_NAMESPACE}`: {err}"))
        })?;
        Ok(Self { nvs })
    }
}

fn write_failed(key: &str, err: EspError) -> StoreError {
    StoreError::Write {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

impl KvStore for NvsKvStore {
    fn get_string(&self, key: &str) -> Option<String> {
        let mut buffer = [0_u8; NVS_STRING_CAPACITY];
        match self.nvs.get_str(key, &mut buffer) {
            Ok(value) => value.map(str::to_string),
            Err(err) => {
                warn!("nvs read of `{key}` failed: {err}");
                None
            }
        }
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.nvs
            .set_str(key, value)
            .map_err(|err| write_failed(key, err))
    }

    // Floats are kept as their bit pattern.
    fn get_float(&self, key: &str) -> Option<f32> {
        self.nvs.get_u32(key).ok().flatten().map(f32::from_bits)
    }

    fn put_float(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.nvs
            .set_u32(key, value.to_bits())
            .map_err(|err| write_failed(key, err))
    }

    fn get_byte(&self, key: &str) -> Option<u8> {
        self.nvs.get_u8(key).ok().flatten()
    }

    fn put_byte(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.nvs
            .set_u8(key, value)
            .map_err(|err| write_failed(key, err))
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.nvs
            .remove(key)
            .map(|_| ())
            .map_err(|err| write_failed(key, err))
    }
}

struct EspWifiLink {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
}

fn driver_error(err: EspError) -> NetworkError {
    NetworkError::Driver(err.to_string())
}

impl EspWifiLink {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))
            .context("failed to create wifi driver")?;
        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            access_point: None,
        })
    }

    fn apply(&mut self) -> Result<(), NetworkError> {
        let configuration = match &self.access_point {
            Some(access_point) => Configuration::Mixed(self.client.clone(), access_point.clone()),
            None => Configuration::Client(self.client.clone()),
        };
        self.wifi
            .set_configuration(&configuration)
            .map_err(driver_error)?;
        if !self.wifi.is_started().map_err(driver_error)? {
            self.wifi.start().map_err(driver_error)?;
        }
        Ok(())
    }
}

impl NetworkLink for EspWifiLink {
    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.access_point = Some(AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::InvalidPassword)?,
            auth_method: AuthMethod::WPA2Personal,
            channel: 1,
            ..Default::default()
        });
        self.apply()?;
        info!("access point `{ssid}` started");
        Ok(())
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        self.client = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        };
        self.apply()?;
        self.wifi.connect().map_err(driver_error)
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.wifi.disconnect().map_err(driver_error)
    }

    fn scan(&mut self) -> Result<Vec<RawAccessPoint>, NetworkError> {
        let found = self.wifi.scan().map_err(driver_error)?;
        Ok(found
            .into_iter()
            .map(|ap| RawAccessPoint {
                ssid: ap.ssid.to_string(),
                rssi: i32::from(ap.signal_strength),
                secured: !matches!(ap.auth_method, None | Some(AuthMethod::None)),
            })
            .collect())
    }

    fn station_info(&self) -> StationInfo {
        if !self.is_connected() {
            return StationInfo::default();
        }
        let ip = self
            .wifi
            .sta_netif()
            .get_ip_info()
            .map(|info| info.ip.to_string())
            .unwrap_or_default();
        StationInfo {
            ssid: self.client.ssid.to_string(),
            ip,
            rssi: station_rssi().unwrap_or(0),
        }
    }

    fn access_point_ip(&self) -> Option<String> {
        self.access_point.as_ref()?;
        self.wifi
            .ap_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }

    fn access_point_clients(&self) -> usize {
        let mut list = esp_idf_svc::sys::wifi_sta_list_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_ap_get_sta_list(&mut list) };
        if rc == esp_idf_svc::sys::ESP_OK {
            usize::try_from(list.num).unwrap_or(0)
        } else {
            0
        }
    }
}

fn station_rssi() -> Option<i32> {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    (rc == esp_idf_svc::sys::ESP_OK).then(|| i32::from(ap_info.rssi))
}

type Sessions = Arc<Mutex<Vec<(i32, EspHttpWsDetachedSender)>>>;

fn lock_sessions(sessions: &Sessions) -> MutexGuard<'_, Vec<(i32, EspHttpWsDetachedSender)>> {
    sessions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EspOutputs {
    sessions: Sessions,
    led: Option<PinDriver<'static, AnyOutputPin, Output>>,
    pixel: NeoPixel,
}

impl Outputs for EspOutputs {
    fn broadcast(&mut self, frame: String) {
        lock_sessions(&self.sessions).retain_mut(|(session, sender)| {
            match sender.send(FrameType::Text(false), frame.as_bytes()) {
                Ok(()) => true,
                Err(err) => {
                    warn!("dropping websocket session {session}: {err}");
                    false
                }
            }
        });
    }

    fn digital_led(&mut self, on: bool) {
        let Some(led) = self.led.as_mut() else {
            return;
        };
        let result = if on { led.set_high() } else { led.set_low() };
        if let Err(err) = result {
            warn!("failed to drive digital LED: {err}");
        }
    }

    fn indicator(&mut self, color: Rgb) {
        self.pixel.set(color);
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = match NvsKvStore::open(nvs_partition.clone()) {
        Ok(store) => store,
        Err(err) => {
            error!("settings storage unavailable: {err}");
            return Err(err).context("failed to open settings store");
        }
    };

    let mut config = ServiceConfig::default();
    apply_build_overrides(&mut config);

    let Peripherals {
        modem,
        pins,
        rmt,
        adc1,
        ..
    } = Peripherals::take()?;

    let led = init_output_pin(config.led_pin, "digital LED");
    let neo_pin = unsafe { AnyOutputPin::new(i32::from(config.neo_pin)) };
    let pixel = match NeoPixel::new(rmt.channel0, neo_pin) {
        Ok(pixel) => {
            info!("neopixel initialized on GPIO{}", config.neo_pin);
            pixel
        }
        Err(err) => {
            warn!("failed to initialize neopixel, running disabled: {err:#}");
            NeoPixel::disabled()
        }
    };

    let (climate, light, reader) = sensor_feed();
    spawn_climate_reader(climate);
    let light_led = init_output_pin(config.light_led_pin, "light LED");
    spawn_light_reader(adc1, pins.gpio1, light_led, light, config.light_threshold);

    let link = EspWifiLink::new(modem, sys_loop, nvs_partition)?;
    disable_wifi_power_save();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let (service, boot_effects) = DeviceService::start(config, store, link, SystemClock, reader)
        .context("failed to start device service")?;

    let sessions: Sessions = Arc::new(Mutex::new(Vec::new()));
    let mut outputs = EspOutputs {
        sessions: sessions.clone(),
        led,
        pixel,
    };
    control::apply_effects(&mut outputs, boot_effects);

    let (requests, request_rx) = mpsc::channel();
    thread::Builder::new()
        .name("control".into())
        .stack_size(16 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }
            control::run(service, request_rx, &mut outputs, feed_watchdog);
        })
        .context("failed to spawn control thread")?;

    let server = create_http_server(requests, sessions)?;

    // Keep services alive for the program lifetime.
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn apply_build_overrides(config: &mut ServiceConfig) {
    if let Some(ssid) = option_env!("SENSORHUB_AP_SSID") {
        config.ap_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("SENSORHUB_AP_PASS") {
        config.ap_password = pass.to_string();
    }
}

fn init_output_pin(pin: u8, label: &str) -> Option<PinDriver<'static, AnyOutputPin, Output>> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(i32::from(pin))) };
    match driver {
        Ok(mut driver) => {
            let _ = driver.set_low();
            Some(driver)
        }
        Err(err) => {
            warn!("{label} unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

fn spawn_climate_reader(climate: ClimateProducer) {
    let spawned = thread::Builder::new()
        .name("dht11".into())
        .stack_size(4 * 1024)
        .spawn(move || {
            let pin = unsafe { AnyIOPin::new(DHT11_PIN) };
            let mut pin = match PinDriver::input_output_od(pin) {
                Ok(pin) => pin,
                Err(err) => {
                    error!("DHT11 unavailable on GPIO{DHT11_PIN}: {err}");
                    return;
                }
            };
            if let Err(err) = pin.set_pull(Pull::Up).and_then(|_| pin.set_high()) {
                warn!("failed to prepare DHT11 line: {err}");
            }
            let mut delay = Ets;

            loop {
                let _ = pin.set_high();
                match dht11::blocking::read(&mut delay, &mut pin) {
                    Ok(reading) => {
                        let temperature_c = f32::from(reading.temperature);
                        let humidity_pct = f32::from(reading.relative_humidity);
                        info!("[DHT11] {temperature_c:.1}C {humidity_pct:.1}%");
                        climate.publish(temperature_c, humidity_pct, monotonic_ms());
                    }
                    Err(err) => {
                        warn!("failed to read DHT11 on GPIO{DHT11_PIN}: {err:?}");
                        climate.publish_failure(monotonic_ms());
                    }
                }
                thread::sleep(CLIMATE_PERIOD);
            }
        });
    if let Err(err) = spawned {
        error!("failed to spawn DHT11 reader: {err}");
    }
}

fn spawn_light_reader(
    adc1: ADC1,
    sensor_pin: Gpio1,
    mut led: Option<PinDriver<'static, AnyOutputPin, Output>>,
    light: LightProducer,
    threshold: i32,
) {
    let spawned = thread::Builder::new()
        .name("light".into())
        .stack_size(4 * 1024)
        .spawn(move || {
            let result = (|| -> anyhow::Result<()> {
                let adc = AdcDriver::new(adc1)?;
                let channel_config = AdcChannelConfig {
                    attenuation: DB_11,
                    ..Default::default()
                };
                let mut channel = AdcChannelDriver::new(&adc, sensor_pin, &channel_config)?;

                loop {
                    match adc.read(&mut channel) {
                        Ok(raw) => {
                            let level = i32::from(raw);
                            let dark = level < threshold;
                            if let Some(led) = led.as_mut() {
                                let _ = if dark { led.set_high() } else { led.set_low() };
                            }
                            light.publish(level, dark);
                        }
                        Err(err) => warn!("light sensor read failed: {err}"),
                    }
                    thread::sleep(LIGHT_PERIOD);
                }
            })();
            if let Err(err) = result {
                error!("light sensor unavailable: {err:#}");
            }
        });
    if let Err(err) = spawned {
        error!("failed to spawn light reader: {err}");
    }
}

fn create_http_server(
    requests: Sender<ServiceRequest>,
    sessions: Sessions,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    for page in Page::ALL {
        let requests = requests.clone();
        server.fn_handler::<anyhow::Error, _>(page.path(), Method::Get, move |req| {
            let (tx, rx) = mpsc::channel();
            let query = ServiceRequest::Query {
                page,
                reply: Box::new(move |view| {
                    let _ = tx.send(view);
                }),
            };
            requests
                .send(query)
                .map_err(|_| anyhow!("control loop stopped"))?;
            match rx.recv_timeout(QUERY_TIMEOUT) {
                Ok(view) => write_json(req, &view),
                Err(_) => write_error(req, 503, "service unavailable"),
            }
        })?;
    }

    server.ws_handler("/ws", move |ws: &mut EspHttpWsConnection| {
        handle_ws_event(ws, &requests, &sessions)
    })?;

    Ok(server)
}

fn handle_ws_event(
    ws: &mut EspHttpWsConnection,
    requests: &Sender<ServiceRequest>,
    sessions: &Sessions,
) -> Result<(), EspError> {
    let session = ws.session();

    if ws.is_new() {
        let sender = ws.create_detached_sender()?;
        lock_sessions(sessions).push((session, sender));
        info!("websocket session {session} attached");
        let _ = requests.send(ServiceRequest::Attach);
        return Ok(());
    }

    if ws.is_closed() {
        lock_sessions(sessions).retain(|(id, _)| *id != session);
        info!("websocket session {session} detached");
        let _ = requests.send(ServiceRequest::Detach);
        return Ok(());
    }

    let (_, len) = ws.recv(&mut [])?;
    if !control::frame_fits(len) {
        // The payload stays unread, so the session cannot continue.
        warn!("websocket session {session} sent an oversized frame ({len} bytes), closing");
        return Err(EspError::from_infallible::<ESP_ERR_INVALID_SIZE>());
    }

    let mut buffer = [0_u8; control::MAX_INBOUND_FRAME];
    ws.recv(&mut buffer[..len])?;
    match control::frame_text(&buffer[..len]) {
        Some(text) => {
            let _ = requests.send(ServiceRequest::Inbound(text.to_string()));
        }
        None => warn!("websocket session {session} sent invalid utf-8"),
    }
    Ok(())
}

fn write_json<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: Request<&mut EspHttpConnection<'_>>,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
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

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
