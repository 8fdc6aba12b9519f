//! The device service: provisioning, settings, alerting and telemetry behind
//! one owner.
//!
//! Shells own a single [`DeviceService`] on their control thread, feed it
//! client events and inbound frames, call [`DeviceService::tick`] on the
//! scheduler cadence, and apply the returned [`Effect`]s.

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    alert::{AlertController, AlertTransition},
    clock::Clock,
    config::{is_valid_threshold, ServiceConfig},
    network::{scan_networks, NetworkError, NetworkLink},
    protocol::{
        parse_command, AlertView, ColorAck, Command, LedsView, LightView, NetworksView,
        Outbound, Page, SensorsView, StatusView, View,
    },
    provisioning::{ConnectOutcome, Provisioner, ProvisioningState},
    snapshot::SensorReader,
    store::{KvStore, SettingsStore, StoreError},
    telemetry::TelemetryPublisher,
    types::{ColorSetting, LedState, NetworkCredential, Rgb},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("temperature threshold {0} is outside -40..=125")]
    InvalidThreshold(f32),
}

/// Output the shell must apply after each call into the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to every attached realtime client.
    Broadcast(Outbound),
    DigitalLed(bool),
    Indicator(Rgb),
}

pub struct DeviceService<S, N, C> {
    config: ServiceConfig,
    store: SettingsStore<S>,
    link: N,
    clock: C,
    sensors: SensorReader,

    provisioner: Provisioner,
    alert: AlertController,
    telemetry: TelemetryPublisher,

    leds: LedState,
    saved_hex: String,
    indicator: Rgb,
    clients: usize,
}

impl<S: KvStore, N: NetworkLink, C: Clock> DeviceService<S, N, C> {
    /// Loads persisted settings and runs the boot provisioning path, which may
    /// block for up to the connect timeout.
    pub fn start(
        mut config: ServiceConfig,
        backend: S,
        mut link: N,
        clock: C,
        sensors: SensorReader,
    ) -> Result<(Self, Vec<Effect>), ServiceError> {
        config.sanitize();
        let store = SettingsStore::new(backend);
        let settings = store.load_settings();
        info!(
            "settings loaded: indicator {}, alert {}, threshold {:.1}C",
            settings.neo_color.hex, settings.alert_color.hex, settings.temp_threshold_c
        );

        let mut provisioner = Provisioner::new(&config);
        let credential = store.load_credential();
        provisioner.start(&mut link, &clock, credential.as_ref())?;
        info!("provisioning state {}", provisioner.state().as_str());

        let alert = AlertController::new(
            settings.temp_threshold_c,
            settings.alert_color,
            config.blink_interval_ms,
        );
        let telemetry = TelemetryPublisher::new(&config, clock.now_ms());

        let mut service = Self {
            config,
            store,
            link,
            clock,
            sensors,
            provisioner,
            alert,
            telemetry,
            leds: LedState::with_saved_color(settings.neo_color.rgb),
            saved_hex: settings.neo_color.hex,
            indicator: Rgb::OFF,
            clients: 0,
        };

        let mut effects = vec![Effect::DigitalLed(false), Effect::Indicator(Rgb::OFF)];
        service.update_alert(&mut effects);
        Ok((service, effects))
    }

    pub fn provisioning_state(&self) -> ProvisioningState {
        self.provisioner.state()
    }

    pub fn is_alert_active(&self) -> bool {
        self.alert.is_active()
    }

    pub fn led_state(&self) -> LedState {
        self.leds
    }

    pub fn store(&self) -> &SettingsStore<S> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// A new realtime client. Everyone gets the fresh state, not just the
    /// newcomer.
    pub fn client_attached(&mut self) -> Vec<Effect> {
        self.clients += 1;
        info!("realtime client attached ({} total)", self.clients);
        let mut effects = Vec::new();
        self.broadcast(&mut effects, Outbound::Status(self.status_view()));
        self.broadcast(&mut effects, Outbound::Sensors(self.sensors_view()));
        self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
        self.broadcast(&mut effects, Outbound::Light(self.light_view()));
        self.broadcast(&mut effects, Outbound::AlertSettings(self.alert_view()));
        effects
    }

    pub fn client_detached(&mut self) {
        self.clients = self.clients.saturating_sub(1);
        info!("realtime client detached ({} left)", self.clients);
    }

    /// Handles one inbound text frame. Malformed frames are logged and
    /// dropped without a reply.
    pub fn handle_message(&mut self, raw: &str) -> Vec<Effect> {
        match parse_command(raw) {
            Ok(command) => self.dispatch(command),
            Err(err) => {
                warn!("dropping realtime frame: {err}");
                Vec::new()
            }
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Vec<Effect> {
        let mut effects = Vec::new();
        match command {
            Command::Scan => {
                let list = scan_networks(&mut self.link);
                self.broadcast(&mut effects, Outbound::Networks { list });
            }
            Command::Connect { ssid, password } => {
                self.handle_connect(NetworkCredential::new(ssid, password), &mut effects);
            }
            Command::Disconnect => {
                if let Err(err) = self.provisioner.disconnect(&mut self.link) {
                    warn!("disconnect refused: {err}");
                }
                self.broadcast(&mut effects, Outbound::Status(self.status_view()));
            }
            Command::ClearCredentials => {
                let success = match self.store.clear_credential() {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("failed to clear wifi credentials: {err}");
                        false
                    }
                };
                self.broadcast(&mut effects, Outbound::CredentialsCleared { success });
            }
            Command::GetStatus => {
                self.broadcast(&mut effects, Outbound::Status(self.status_view()));
            }
            Command::GetSensors => {
                self.broadcast(&mut effects, Outbound::Sensors(self.sensors_view()));
            }
            Command::GetLeds => {
                self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
            }
            Command::GetLight => {
                self.broadcast(&mut effects, Outbound::Light(self.light_view()));
            }
            Command::GetAlertSettings => {
                self.broadcast(&mut effects, Outbound::AlertSettings(self.alert_view()));
            }
            Command::ControlLed { state } => {
                info!("digital led {}", if state { "on" } else { "off" });
                self.leds.digital_on = state;
                effects.push(Effect::DigitalLed(state));
                self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
            }
            Command::ControlNeo { state } => {
                if self.alert.is_active() {
                    info!("indicator command ignored while temperature alert is active");
                } else {
                    self.leds.neo_on = state;
                    if state {
                        self.leds.neo_color = self.leds.saved_color;
                    }
                    self.render_indicator(&mut effects);
                }
                self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
            }
            Command::PreviewNeoColor { r, g, b } => {
                self.leds.neo_on = true;
                self.leds.neo_color = Rgb::new(r, g, b);
                self.render_indicator(&mut effects);
                self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
            }
            Command::SaveNeoColor { r, g, b, hex } => {
                let color = ColorSetting::new(Rgb::new(r, g, b), hex.as_deref());
                let ack = match self.save_neo_color(&color) {
                    Ok(()) => ColorAck::saved(color.rgb, &color.hex),
                    Err(err) => {
                        warn!("failed to save indicator colour: {err}");
                        ColorAck {
                            success: false,
                            ..ColorAck::saved(color.rgb, &color.hex)
                        }
                    }
                };
                self.render_indicator(&mut effects);
                self.broadcast(&mut effects, Outbound::NeoColorSaved(ack));
                self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
            }
            Command::SaveAlertColor { r, g, b, hex } => {
                let color = ColorSetting::new(Rgb::new(r, g, b), hex.as_deref());
                let ack = match self.save_alert_color(&color) {
                    Ok(()) => ColorAck::saved(color.rgb, &color.hex),
                    Err(err) => {
                        warn!("failed to save alert colour: {err}");
                        ColorAck {
                            success: false,
                            ..ColorAck::saved(color.rgb, &color.hex)
                        }
                    }
                };
                self.render_indicator(&mut effects);
                self.broadcast(&mut effects, Outbound::AlertColorSaved(ack));
                self.broadcast(&mut effects, Outbound::AlertSettings(self.alert_view()));
            }
            Command::SaveTempThreshold { threshold } => {
                let success = match self.save_threshold(threshold) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("temperature threshold not saved: {err}");
                        false
                    }
                };
                self.update_alert(&mut effects);
                self.broadcast(
                    &mut effects,
                    Outbound::TempThresholdSaved {
                        success,
                        threshold: self.alert.threshold_c(),
                    },
                );
                self.broadcast(&mut effects, Outbound::AlertSettings(self.alert_view()));
            }
            Command::Unknown => debug!("ignoring unknown realtime action"),
        }
        effects
    }

    /// One scheduler tick: link upkeep, alert evaluation, then blink, then
    /// periodic telemetry.
    pub fn tick(&mut self) -> Vec<Effect> {
        let now_ms = self.clock.now_ms();
        let mut effects = Vec::new();

        self.provisioner.housekeeping(&mut self.link, now_ms);
        self.update_alert(&mut effects);
        if self.alert.blink(now_ms).is_some() {
            self.render_indicator(&mut effects);
        }

        let due = self.telemetry.poll(now_ms, self.clients);
        if due.status {
            self.broadcast(&mut effects, Outbound::Status(self.status_view()));
        }
        if due.sensors {
            self.broadcast(&mut effects, Outbound::Sensors(self.sensors_view()));
            self.broadcast(&mut effects, Outbound::Leds(self.leds_view()));
        }
        effects
    }

    /// Snapshot for the read-only HTTP endpoints. `Page::Scan` runs a scan.
    pub fn view(&mut self, page: Page) -> View {
        match page {
            Page::Scan => View::Networks(NetworksView {
                networks: scan_networks(&mut self.link),
            }),
            Page::Status => View::Status(self.status_view()),
            Page::Sensors => View::Sensors(self.sensors_view()),
            Page::Leds => View::Leds(self.leds_view()),
            Page::Light => View::Light(self.light_view()),
            Page::Alert => View::Alert(self.alert_view()),
        }
    }

    fn handle_connect(&mut self, credential: NetworkCredential, effects: &mut Vec<Effect>) {
        if credential.ssid.is_empty() {
            warn!("connect requested without an ssid");
            self.broadcast(
                effects,
                Outbound::ConnectResult {
                    success: false,
                    message: "SSID is required".to_string(),
                },
            );
            return;
        }

        let message = match self.connect(&credential) {
            Ok(outcome) => outcome.message(),
            Err(err) => {
                warn!("connected but credentials were not saved: {err}");
                "Connected, but credentials could not be saved".to_string()
            }
        };
        let success = self.provisioner.state() == ProvisioningState::StationConnected;
        self.broadcast(effects, Outbound::ConnectResult { success, message });
        self.broadcast(effects, Outbound::Status(self.status_view()));
    }

    fn connect(&mut self, credential: &NetworkCredential) -> Result<ConnectOutcome, ServiceError> {
        let timeout_ms = self.provisioner.connect_timeout_ms();
        let outcome =
            self.provisioner
                .attempt_connect(&mut self.link, &self.clock, credential, timeout_ms);
        if outcome.is_connected() {
            self.store.save_credential(credential)?;
        } else {
            warn!("connection to `{}` failed: {}", credential.ssid, outcome.message());
        }
        Ok(outcome)
    }

    fn save_neo_color(&mut self, color: &ColorSetting) -> Result<(), ServiceError> {
        self.store.save_neo_color(color)?;
        info!("indicator colour saved: {}", color.hex);
        self.leds.saved_color = color.rgb;
        self.leds.neo_color = color.rgb;
        self.leds.neo_on = true;
        self.saved_hex = color.hex.clone();
        Ok(())
    }

    fn save_alert_color(&mut self, color: &ColorSetting) -> Result<(), ServiceError> {
        self.store.save_alert_color(color)?;
        info!("alert colour saved: {}", color.hex);
        self.alert.set_alert_color(color.clone());
        Ok(())
    }

    fn save_threshold(&mut self, threshold_c: f32) -> Result<(), ServiceError> {
        if !is_valid_threshold(threshold_c) {
            return Err(ServiceError::InvalidThreshold(threshold_c));
        }
        self.store.save_threshold(threshold_c)?;
        info!("temperature threshold saved: {threshold_c:.1}C");
        self.alert.set_threshold(threshold_c);
        Ok(())
    }

    fn update_alert(&mut self, effects: &mut Vec<Effect>) {
        let snapshot = self.sensors.snapshot();
        match self.alert.evaluate(&snapshot, self.clock.now_ms()) {
            AlertTransition::Unchanged => {}
            AlertTransition::Entered => {
                self.render_indicator(effects);
                self.broadcast(effects, Outbound::AlertSettings(self.alert_view()));
            }
            AlertTransition::Cleared => {
                if self.leds.neo_on {
                    self.leds.neo_color = self.leds.saved_color;
                }
                self.render_indicator(effects);
                self.broadcast(effects, Outbound::AlertSettings(self.alert_view()));
            }
        }
    }

    fn render_indicator(&mut self, effects: &mut Vec<Effect>) {
        let color = self.alert.indicator_color(self.leds.resting_color());
        if color != self.indicator {
            self.indicator = color;
            effects.push(Effect::Indicator(color));
        }
    }

    fn broadcast(&self, effects: &mut Vec<Effect>, frame: Outbound) {
        if self.clients > 0 {
            effects.push(Effect::Broadcast(frame));
        }
    }

    fn status_view(&self) -> StatusView {
        let status = self.provisioner.status(&self.link);
        StatusView {
            connected: status.connected,
            ssid: status.ssid,
            ip: status.ip,
            rssi: status.rssi,
            config_mode: status.ap_mode,
            config_ssid: status.ap_ssid,
            config_ip: status.ap_ip.unwrap_or_default(),
        }
    }

    fn sensors_view(&self) -> SensorsView {
        let snapshot = self.sensors.snapshot();
        SensorsView {
            temperature: snapshot.temperature_c,
            humidity: snapshot.humidity_pct,
            light_level: snapshot.light_level,
            led_state: snapshot.light_led_on,
            temp_alert: self.alert.is_active(),
            temp_threshold: self.alert.threshold_c(),
            timestamp: self.clock.now_ms(),
            valid: snapshot.valid,
        }
    }

    fn leds_view(&self) -> LedsView {
        let neo = self.leds.neo_color;
        let neo_hex = if neo == self.leds.saved_color {
            self.saved_hex.clone()
        } else {
            neo.to_hex()
        };
        LedsView {
            led_state: self.leds.digital_on,
            neo_state: self.leds.neo_on,
            neo_r: neo.r,
            neo_g: neo.g,
            neo_b: neo.b,
            neo_hex,
            saved_hex: self.saved_hex.clone(),
            light_led_state: self.sensors.snapshot().light_led_on,
            led_pin: self.config.led_pin,
            neo_pin: self.config.neo_pin,
            light_led_pin: self.config.light_led_pin,
            temp_alert: self.alert.is_active(),
            timestamp: self.clock.now_ms(),
        }
    }

    fn light_view(&self) -> LightView {
        let snapshot = self.sensors.snapshot();
        LightView {
            light_level: snapshot.light_level,
            led_state: snapshot.light_led_on,
            threshold: self.config.light_threshold,
            sensor_pin: self.config.light_sensor_pin,
            led_pin: self.config.light_led_pin,
            timestamp: self.clock.now_ms(),
        }
    }

    fn alert_view(&self) -> AlertView {
        let color = self.alert.alert_color();
        AlertView {
            alert_r: color.rgb.r,
            alert_g: color.rgb.g,
            alert_b: color.rgb.b,
            alert_hex: color.hex.clone(),
            temp_threshold: self.alert.threshold_c(),
            current_temp: self.sensors.snapshot().temperature_c,
            temp_alert: self.alert.is_active(),
            timestamp: self.clock.now_ms(),
        }
    }
}
