use anyhow::Result;
use log::info;

use crate::dht20::SensorReading;

/// One measurement per cycle; implemented by the DHT20 bus binding.
pub trait SampleSource {
    fn sample(&mut self) -> Result<SensorReading>;
}

/// Destination for finished readings; implemented by the telemetry
/// reporter.
pub trait ReadingSink {
    fn submit(&mut self, reading: &SensorReading) -> Result<()>;
}

#[derive(Debug)]
pub enum CycleOutcome {
    Reported,
    SensorFailed(anyhow::Error),
    ReportFailed(anyhow::Error),
}

/// Run one acquire-and-report cycle. A failed acquisition skips the sink
/// entirely; both failure kinds are returned for the caller to log, never
/// escalated.
pub fn run_cycle(source: &mut impl SampleSource, sink: &mut impl ReadingSink) -> CycleOutcome {
    let reading = match source.sample() {
        Ok(reading) => reading,
        Err(e) => return CycleOutcome::SensorFailed(e),
    };

    info!(
        "Humidity = {:.2}% : Temperature = {:.2}C",
        reading.humidity, reading.temperature_c
    );

    match sink.submit(&reading) {
        Ok(()) => CycleOutcome::Reported,
        Err(e) => CycleOutcome::ReportFailed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct GoodSource(SensorReading);

    impl SampleSource for GoodSource {
        fn sample(&mut self) -> Result<SensorReading> {
            Ok(self.0)
        }
    }

    struct DeadSource;

    impl SampleSource for DeadSource {
        fn sample(&mut self) -> Result<SensorReading> {
            bail!("bus timeout")
        }
    }

    struct RecordingSink {
        submitted: Vec<SensorReading>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Self {
            Self {
                submitted: Vec::new(),
                fail,
            }
        }
    }

    impl ReadingSink for RecordingSink {
        fn submit(&mut self, reading: &SensorReading) -> Result<()> {
            if self.fail {
                bail!("status 500");
            }
            self.submitted.push(*reading);
            Ok(())
        }
    }

    #[test]
    fn sensor_failure_skips_the_reporter() {
        let mut sink = RecordingSink::new(false);
        let outcome = run_cycle(&mut DeadSource, &mut sink);
        assert!(matches!(outcome, CycleOutcome::SensorFailed(_)));
        assert!(sink.submitted.is_empty());
    }

    #[test]
    fn successful_cycle_reports_the_reading() {
        let reading = SensorReading {
            temperature_c: 21.5,
            humidity: 40.0,
        };
        let mut sink = RecordingSink::new(false);
        let outcome = run_cycle(&mut GoodSource(reading), &mut sink);
        assert!(matches!(outcome, CycleOutcome::Reported));
        assert_eq!(sink.submitted, vec![reading]);
    }

    #[test]
    fn report_failure_is_contained() {
        let reading = SensorReading {
            temperature_c: 21.5,
            humidity: 40.0,
        };
        let mut sink = RecordingSink::new(true);
        let outcome = run_cycle(&mut GoodSource(reading), &mut sink);
        assert!(matches!(outcome, CycleOutcome::ReportFailed(_)));
    }
}
