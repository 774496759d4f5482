use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use log::{info, warn};

// Backoff between a disconnect and the next association attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(300);
// Fallback poll interval for waiters; the condvar normally wakes them first.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Link events as delivered by the networking stack's event context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Started,
    Associated,
    AddressAcquired,
    Disconnected,
}

impl ConnectionState {
    /// Fold one link event into the state machine. Events that make no
    /// sense for the current state leave it unchanged.
    pub fn on_event(self, event: LinkEvent) -> ConnectionState {
        match (self, event) {
            (Self::Disconnected, LinkEvent::Started) => Self::Connecting,
            (Self::Connecting, LinkEvent::Started) => Self::Connecting,
            (Self::Connecting, LinkEvent::Associated) => Self::Connected,
            (Self::Connecting, LinkEvent::AddressAcquired) => Self::Connected,
            (Self::Connected, LinkEvent::AddressAcquired) => Self::Connected,
            (_, LinkEvent::Disconnected) => Self::Disconnected,
            (state, _) => state,
        }
    }
}

/// State cell shared between the event callbacks, the supervisor thread,
/// and blocking waiters. Callbacks only lock briefly and notify; they never
/// touch the driver or sleep.
struct LinkShared {
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            changed: Condvar::new(),
        }
    }

    fn apply(&self, event: LinkEvent) {
        let mut state = self.state.lock().unwrap();
        let next = state.on_event(event);
        if next != *state {
            info!("WiFi state: {:?} -> {:?}", *state, next);
            *state = next;
            self.changed.notify_all();
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn wait_change(&self, timeout: Duration) {
        let guard = self.state.lock().unwrap();
        let _ = self.changed.wait_timeout(guard, timeout).unwrap();
    }
}

/// Owns the WiFi association lifecycle: configures the station, translates
/// driver events into `LinkEvent`s, and keeps a supervisor thread retrying
/// the link forever. There is no error path for a lost link by design; the
/// node has no useful offline behavior.
pub struct WifiLink {
    shared: Arc<LinkShared>,
    _wifi_sub: EspSubscription<'static, System>,
    _ip_sub: EspSubscription<'static, System>,
}

impl WifiLink {
    pub fn connect(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        ssid: &str,
        password: &str,
    ) -> Result<Self> {
        let mut wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;

        let auth = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let mut wifi_ssid = heapless::String::<32>::new();
        let mut wifi_pass = heapless::String::<64>::new();
        wifi_ssid.push_str(ssid).ok();
        wifi_pass.push_str(password).ok();

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: wifi_ssid,
            password: wifi_pass,
            auth_method: auth,
            ..Default::default()
        }))?;

        let shared = Arc::new(LinkShared::new());

        let wifi_sub = {
            let shared = shared.clone();
            sysloop.subscribe::<WifiEvent, _>(move |event| {
                let link_event = match event {
                    WifiEvent::StaStarted => Some(LinkEvent::Started),
                    WifiEvent::StaConnected(_) => Some(LinkEvent::Associated),
                    WifiEvent::StaDisconnected(_) => Some(LinkEvent::Disconnected),
                    _ => None,
                };
                if let Some(link_event) = link_event {
                    shared.apply(link_event);
                }
            })?
        };

        let ip_sub = {
            let shared = shared.clone();
            sysloop.subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    info!("Got IP: {}", assignment.ip());
                    shared.apply(LinkEvent::AddressAcquired);
                }
            })?
        };

        wifi.start()?;
        info!("Connecting to WiFi '{}'...", ssid);

        let supervisor_shared = shared.clone();
        thread::Builder::new()
            .name("wifi".into())
            .stack_size(8192)
            .spawn(move || supervise(wifi, supervisor_shared))
            .expect("failed to spawn wifi thread");

        Ok(Self {
            shared,
            _wifi_sub: wifi_sub,
            _ip_sub: ip_sub,
        })
    }

    /// Block until the link is up. Woken by the event context through the
    /// condvar, with a periodic poll as fallback. May wait forever.
    pub fn wait_connected(&self) {
        info!("Waiting for WiFi connection...");
        let mut state = self.shared.state.lock().unwrap();
        while *state != ConnectionState::Connected {
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(state, WAIT_POLL_INTERVAL)
                .unwrap();
            state = guard;
        }
        info!("WiFi connected, proceeding");
    }

    #[allow(dead_code)]
    pub fn state(&self) -> ConnectionState {
        self.shared.current()
    }
}

/// Drives the association side effects the event callbacks must not:
/// issues `connect()` whenever the machine enters Connecting, and after a
/// disconnect waits out the backoff and starts a fresh attempt. Retries
/// without bound.
fn supervise(mut wifi: EspWifi<'static>, shared: Arc<LinkShared>) {
    let mut prev = ConnectionState::Disconnected;
    loop {
        let state = shared.current();
        match state {
            ConnectionState::Connecting if prev != ConnectionState::Connecting => {
                if let Err(e) = wifi.connect() {
                    warn!("WiFi connect request failed: {}", e);
                    shared.apply(LinkEvent::Disconnected);
                }
            }
            ConnectionState::Disconnected if prev != ConnectionState::Disconnected => {
                info!(
                    "WiFi disconnected, retrying in {}ms...",
                    RECONNECT_BACKOFF.as_millis()
                );
                thread::sleep(RECONNECT_BACKOFF);
                prev = ConnectionState::Disconnected;
                shared.apply(LinkEvent::Started);
                continue;
            }
            _ => shared.wait_change(WAIT_POLL_INTERVAL),
        }
        prev = state;
    }
}
