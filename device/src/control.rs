//! The control thread: sole owner of the device service.
//!
//! Web handlers never touch the service. They queue [`ServiceRequest`]s which
//! the loop drains at the top of every tick, then the tick itself runs.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};

use sensorhub_common::{Clock, DeviceService, Effect, KvStore, NetworkLink, Page, Rgb, View};

/// Largest inbound websocket frame either shell reads.
pub const MAX_INBOUND_FRAME: usize = 512;

pub type Reply = Box<dyn FnOnce(View) + Send>;

pub enum ServiceRequest {
    Attach,
    Detach,
    Inbound(String),
    Query { page: Page, reply: Reply },
}

/// Where effects land: sockets and LEDs on the device, logs on the host.
pub trait Outputs {
    fn broadcast(&mut self, frame: String);
    fn digital_led(&mut self, on: bool);
    fn indicator(&mut self, color: Rgb);
}

/// A session announcing a larger frame is closed instead of read.
pub fn frame_fits(len: usize) -> bool {
    len <= MAX_INBOUND_FRAME
}

/// Text of a received frame, without the NUL terminator the ESP server appends.
pub fn frame_text(payload: &[u8]) -> Option<&str> {
    let payload = payload.strip_suffix(&[0]).unwrap_or(payload);
    std::str::from_utf8(payload).ok()
}

pub fn apply_effects<O: Outputs>(outputs: &mut O, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Broadcast(frame) => match frame.to_json() {
                Ok(text) => outputs.broadcast(text),
                Err(err) => warn!("failed to encode `{}` frame: {err}", frame.kind()),
            },
            Effect::DigitalLed(on) => outputs.digital_led(on),
            Effect::Indicator(color) => outputs.indicator(color),
        }
    }
}

pub fn serve_request<S, N, C>(
    service: &mut DeviceService<S, N, C>,
    request: ServiceRequest,
) -> Vec<Effect>
where
    S: KvStore,
    N: NetworkLink,
    C: Clock,
{
    match request {
        ServiceRequest::Attach => service.client_attached(),
        ServiceRequest::Detach => {
            service.client_detached();
            Vec::new()
        }
        ServiceRequest::Inbound(text) => service.handle_message(&text),
        ServiceRequest::Query { page, reply } => {
            reply(service.view(page));
            Vec::new()
        }
    }
}

/// Runs until every request sender is gone.
pub fn run<S, N, C, O>(
    mut service: DeviceService<S, N, C>,
    requests: Receiver<ServiceRequest>,
    outputs: &mut O,
    mut on_tick: impl FnMut(),
) where
    S: KvStore,
    N: NetworkLink,
    C: Clock,
    O: Outputs,
{
    let tick = Duration::from_millis(service.config().tick_interval_ms);
    info!("control loop running every {}ms", tick.as_millis());

    loop {
        let started = Instant::now();

        loop {
            match requests.try_recv() {
                Ok(request) => {
                    let effects = serve_request(&mut service, request);
                    apply_effects(outputs, effects);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("request channel closed, control loop exiting");
                    return;
                }
            }
        }

        let effects = service.tick();
        apply_effects(outputs, effects);
        on_tick();

        if let Some(remaining) = tick.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }
}
