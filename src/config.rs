use std::time::Duration;

use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use log::info;

pub const NS: &str = "node_cfg";

const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";
const KEY_ENDPOINT: &str = "endpoint";
const KEY_SNTP_SERVER: &str = "sntp_server";
const KEY_REPORT_SECS: &str = "report_s";

const DEFAULT_SNTP_SERVER: &str = "pool.ntp.org";
// Production reporting cadence: one reading every 30 minutes.
pub const DEFAULT_REPORT_PERIOD_SECS: u32 = 30 * 60;

pub struct Config {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub endpoint_url: String,
    pub sntp_server: String,
    pub report_period_secs: u32,
}

/// Read a string from NVS, returning None if the key is absent or on error.
fn nvs_get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    // First call for the required buffer length.
    let len = match nvs.str_len(key) {
        Ok(Some(len)) => len,
        _ => return None,
    };

    let mut buf = vec![0u8; len];
    match nvs.get_str(key, &mut buf) {
        Ok(Some(val)) => {
            let s = val.trim_end_matches('\0').to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        _ => None,
    }
}

impl Config {
    /// Compile-time defaults: secrets injected by build.rs from
    /// secrets.local.rs, plus the fixed production cadence.
    pub fn defaults() -> Config {
        Config {
            wifi_ssid: option_env!("LOCAL_WIFI_SSID").unwrap_or("").to_string(),
            wifi_pass: option_env!("LOCAL_WIFI_PASS").unwrap_or("").to_string(),
            endpoint_url: option_env!("LOCAL_TELEMETRY_URL").unwrap_or("").to_string(),
            sntp_server: DEFAULT_SNTP_SERVER.to_string(),
            report_period_secs: DEFAULT_REPORT_PERIOD_SECS,
        }
    }

    /// Load configuration from NVS, falling back to the defaults for any
    /// missing key.
    pub fn load(nvs: &EspNvs<NvsDefault>) -> Config {
        let mut cfg = Config::defaults();

        if let Some(v) = nvs_get_str(nvs, KEY_WIFI_SSID) {
            cfg.wifi_ssid = v;
        }
        info!("NVS wifi_ssid = {:?}", cfg.wifi_ssid);

        if let Some(v) = nvs_get_str(nvs, KEY_WIFI_PASS) {
            cfg.wifi_pass = v;
        }
        info!("NVS wifi_pass = <{} chars>", cfg.wifi_pass.len());

        if let Some(v) = nvs_get_str(nvs, KEY_ENDPOINT) {
            cfg.endpoint_url = v;
        }
        info!("NVS endpoint = {:?}", cfg.endpoint_url);

        if let Some(v) = nvs_get_str(nvs, KEY_SNTP_SERVER) {
            cfg.sntp_server = v;
        }
        info!("NVS sntp_server = {:?}", cfg.sntp_server);

        // A zero period would turn the report loop into a hot loop.
        if let Ok(Some(v)) = nvs.get_u32(KEY_REPORT_SECS) {
            if v > 0 {
                cfg.report_period_secs = v;
            }
        }
        info!("NVS report_s = {}", cfg.report_period_secs);

        cfg
    }

    /// The inter-cycle delay the report loop sleeps; always derived from
    /// the configured period.
    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period_secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_is_thirty_minutes() {
        let cfg = Config::defaults();
        assert_eq!(cfg.report_period_secs, 1800);
        assert_eq!(cfg.report_period(), Duration::from_secs(1800));
    }

    #[test]
    fn report_period_tracks_the_configured_value() {
        let mut cfg = Config::defaults();
        cfg.report_period_secs = 3;
        assert_eq!(cfg.report_period(), Duration::from_secs(3));
    }

    #[test]
    fn default_sntp_server_is_the_public_pool() {
        assert_eq!(Config::defaults().sntp_server, "pool.ntp.org");
    }
}
