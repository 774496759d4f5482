use std::thread;
use std::time::Duration;

use anyhow::Result;
use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf, SyncMode};
use log::{info, warn};

const FALLBACK_SNTP_SERVER: &str = "time.nist.gov";
const MAX_SYNC_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
// Anything before this is the epoch-ish default clock, not real time.
const PLAUSIBLE_YEAR: i32 = 2023;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncStatus {
    Synced,
    Failed,
}

/// Start SNTP against the given server and wait, with a bounded number of
/// attempts, until the wall clock looks plausible.
///
/// Exhausting the attempts is a soft failure: the caller proceeds with an
/// untrusted clock. The returned EspSntp must be kept alive so background
/// re-sync continues either way.
pub fn sync_time(server: &str) -> Result<(EspSntp<'static>, TimeSyncStatus)> {
    let conf = SntpConf {
        servers: [server, FALLBACK_SNTP_SERVER],
        sync_mode: SyncMode::Immediate,
        operating_mode: OperatingMode::Poll,
    };

    info!("Starting SNTP sync with {}", server);
    let sntp = EspSntp::new(&conf)?;

    let status = await_plausible_year(current_year, MAX_SYNC_ATTEMPTS, || {
        thread::sleep(POLL_INTERVAL)
    });
    match status {
        TimeSyncStatus::Synced => match format_local_time() {
            Some(t) => info!("Time synced: {}", t),
            None => info!("Time synced"),
        },
        TimeSyncStatus::Failed => warn!(
            "Time sync not confirmed after {} attempts, continuing with unsynced clock",
            MAX_SYNC_ATTEMPTS
        ),
    }

    Ok((sntp, status))
}

/// Poll `year` up to `max_attempts` times, waiting between samples, until
/// it reaches the plausibility threshold.
fn await_plausible_year(
    mut year: impl FnMut() -> i32,
    max_attempts: u32,
    mut wait: impl FnMut(),
) -> TimeSyncStatus {
    for attempt in 1..=max_attempts {
        info!("Waiting for time sync... ({}/{})", attempt, max_attempts);
        wait();
        if year() >= PLAUSIBLE_YEAR {
            return TimeSyncStatus::Synced;
        }
    }
    TimeSyncStatus::Failed
}

fn current_year() -> i32 {
    let mut now: libc::time_t = 0;
    unsafe {
        libc::time(&mut now);
    }
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe {
        libc::localtime_r(&now, &mut tm);
    }
    1900 + tm.tm_year
}

/// Format the current local time, or None if the clock is not set.
fn format_local_time() -> Option<String> {
    let mut now: libc::time_t = 0;
    unsafe {
        libc::time(&mut now);
    }
    // If time is near epoch, clock probably hasn't been set yet
    if now < 1_000_000_000 {
        return None;
    }
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe {
        libc::localtime_r(&now, &mut tm);
    }
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_exactly_max_attempts() {
        let mut samples = 0u32;
        let mut waits = 0u32;
        let status = await_plausible_year(
            || {
                samples += 1;
                2020
            },
            10,
            || waits += 1,
        );
        assert_eq!(status, TimeSyncStatus::Failed);
        assert_eq!(samples, 10);
        assert_eq!(waits, 10);
    }

    #[test]
    fn stops_as_soon_as_the_clock_is_plausible() {
        let mut samples = 0u32;
        let status = await_plausible_year(
            || {
                samples += 1;
                if samples >= 3 {
                    2025
                } else {
                    1970
                }
            },
            10,
            || {},
        );
        assert_eq!(status, TimeSyncStatus::Synced);
        assert_eq!(samples, 3);
    }

    #[test]
    fn threshold_year_counts_as_synced() {
        let status = await_plausible_year(|| 2023, 10, || {});
        assert_eq!(status, TimeSyncStatus::Synced);
    }
}
