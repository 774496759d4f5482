use anyhow::{bail, Result};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use log::info;

use crate::cycle::ReadingSink;
use crate::dht20::SensorReading;

const TIMEOUT_MS: u64 = 15_000;

/// Build the report URL: base endpoint plus the reading as query
/// parameters, both values with exactly two fractional digits.
pub fn report_url(base: &str, reading: &SensorReading) -> String {
    format!(
        "{}?temperature={:.2}&humidity={:.2}",
        base, reading.temperature_c, reading.humidity
    )
}

/// Fire-and-forget reporter: one TLS GET per reading, no queueing of
/// failures.
pub struct Reporter {
    endpoint: String,
}

impl Reporter {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }

    /// Deliver one reading. Any transport/TLS error or non-2xx status is a
    /// failure for this cycle; the reading is dropped either way.
    pub fn send(&self, reading: &SensorReading) -> Result<()> {
        let url = report_url(&self.endpoint, reading);

        let config = Configuration {
            timeout: Some(std::time::Duration::from_millis(TIMEOUT_MS)),
            use_global_ca_store: true,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let connection = EspHttpConnection::new(&config)?;

        use embedded_svc::http::client::Client;
        use embedded_svc::http::Method;
        let mut client = Client::wrap(connection);

        let request = client.request(Method::Get, &url, &[])?.submit()?;

        let status = request.status();
        info!(
            "HTTP GET {} -> status {}",
            url.chars().take(80).collect::<String>(),
            status
        );

        if !(200..300).contains(&status) {
            bail!("HTTP error: status {}", status);
        }

        // Drain whatever the endpoint answers so the connection closes
        // cleanly; the body itself is of no interest.
        let mut reader = request;
        let mut buf = [0u8; 256];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
        }

        Ok(())
    }
}

impl ReadingSink for Reporter {
    fn submit(&mut self, reading: &SensorReading) -> Result<()> {
        self.send(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_two_decimal_query_values() {
        let reading = SensorReading {
            temperature_c: 23.456,
            humidity: 45.6,
        };
        assert_eq!(
            report_url("https://x.test/ep", &reading),
            "https://x.test/ep?temperature=23.46&humidity=45.60"
        );
    }

    #[test]
    fn url_values_are_fixed_point_even_at_the_extremes() {
        let reading = SensorReading {
            temperature_c: -50.0,
            humidity: 0.0,
        };
        assert_eq!(
            report_url("https://x.test/ep", &reading),
            "https://x.test/ep?temperature=-50.00&humidity=0.00"
        );

        let reading = SensorReading {
            temperature_c: 150.0,
            humidity: 100.0,
        };
        assert_eq!(
            report_url("https://x.test/ep", &reading),
            "https://x.test/ep?temperature=150.00&humidity=100.00"
        );
    }

    #[test]
    fn rounding_follows_round_half_to_even() {
        // 0.125 and 0.375 are exact in binary, so these pin the formatter's
        // tie-breaking rather than float noise.
        let reading = SensorReading {
            temperature_c: 0.125,
            humidity: 0.375,
        };
        assert_eq!(
            report_url("https://x.test/ep", &reading),
            "https://x.test/ep?temperature=0.12&humidity=0.38"
        );
    }
}
