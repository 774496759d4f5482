mod config;
mod cycle;
mod dht20;
mod telemetry;
mod time_sync;
mod wifi;

use std::thread;

use anyhow::{bail, Result};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use log::{info, warn};

use crate::cycle::{CycleOutcome, SampleSource};
use crate::dht20::{Dht20, SensorReading};
use crate::telemetry::Reporter;

// ── I2C (DHT20 wiring) ──────────────────────────────────────────────
const I2C_FREQ_HZ: u32 = 400_000;

// ── Timing ──────────────────────────────────────────────────────────
const FAILURE_WARN_EVERY: u32 = 10;

/// The DHT20 bound to its bus; the report loop's sample source.
struct SensorBus<'d> {
    dev: Dht20,
    i2c: I2cDriver<'d>,
}

impl SampleSource for SensorBus<'_> {
    fn sample(&mut self) -> Result<SensorReading> {
        self.dev.read(&mut self.i2c)
    }
}

fn note_failure(consecutive: &mut u32, what: &str, err: &anyhow::Error) {
    *consecutive = consecutive.saturating_add(1);
    if *consecutive == 1 || consecutive.is_multiple_of(FAILURE_WARN_EVERY) {
        warn!("{} ({} consecutive): {}", what, consecutive, err);
    } else {
        info!("{} ({} consecutive)", what, consecutive);
    }
}

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("Starting DHT20 telemetry node");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 1. Configuration ──
    let nvs = EspNvs::new(nvs_partition.clone(), config::NS, true)?;
    let cfg = config::Config::load(&nvs);
    if cfg.wifi_ssid.is_empty() {
        bail!("No WiFi SSID configured (set NVS key or secrets.local.rs)");
    }
    if cfg.endpoint_url.is_empty() {
        bail!("No telemetry endpoint configured (set NVS key or secrets.local.rs)");
    }

    // ── 2. I2C bus ──
    let mut i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio6,
        peripherals.pins.gpio7,
        &I2cConfig::new().baudrate(Hertz(I2C_FREQ_HZ)),
    )?;

    // ── 3. WiFi ──
    let link = wifi::WifiLink::connect(
        peripherals.modem,
        sysloop.clone(),
        Some(nvs_partition),
        &cfg.wifi_ssid,
        &cfg.wifi_pass,
    )?;
    link.wait_connected();

    // ── 4. NTP time sync (one-shot; failure is soft) ──
    let (_sntp, _sync_status) = time_sync::sync_time(&cfg.sntp_server)?;

    // ── 5. Sensor ──
    let dev = Dht20::new();
    dev.probe(&mut i2c);
    let mut source = SensorBus { dev, i2c };
    let mut reporter = Reporter::new(&cfg.endpoint_url);

    // ── 6. Report loop ──
    let period = cfg.report_period();
    info!("Entering report loop, period {}s", cfg.report_period_secs);
    let mut consecutive_failures: u32 = 0;
    loop {
        match cycle::run_cycle(&mut source, &mut reporter) {
            CycleOutcome::Reported => {
                consecutive_failures = 0;
            }
            CycleOutcome::SensorFailed(e) => {
                note_failure(&mut consecutive_failures, "Sensor read failed", &e);
            }
            CycleOutcome::ReportFailed(e) => {
                note_failure(&mut consecutive_failures, "Telemetry report failed", &e);
            }
        }
        thread::sleep(period);
    }
}
