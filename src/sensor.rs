use std::collections::VecDeque;

use anyhow::Result;
use rand::Rng;

/// One poll result from the device: force in newtons plus the most recent
/// respiration rate. The belt only produces a rate every few breaths, so
/// `respiration` is NaN on ticks where no rate was reported.
#[derive(Clone, Copy, Debug)]
pub struct Reading {
    pub force: f64,
    pub respiration: f64,
}

/// Seam between the polling loop and the device driver.
pub trait SensorLink {
    fn start(&mut self, period_ms: u32) -> Result<()>;
    /// `Ok(None)` means no measurement was ready this tick; the loop skips it
    /// and tries again on the next one.
    fn read(&mut self) -> Result<Option<Reading>>;
    fn stop(&mut self) -> Result<()>;
    /// Releases the device connection. Best-effort; called once at teardown.
    fn close(&mut self);
}

/// In-memory sensor useful for tests and deterministic playback.
pub struct ManualSensor {
    queue: VecDeque<Option<Reading>>,
}

impl ManualSensor {
    pub fn new(readings: impl IntoIterator<Item = Option<Reading>>) -> Self {
        Self {
            queue: readings.into_iter().collect(),
        }
    }
}

impl SensorLink for ManualSensor {
    fn start(&mut self, _period_ms: u32) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        Ok(self.queue.pop_front().flatten())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Stand-in device for running the app without hardware: a slow force wave
/// with noise, a respiration rate that only shows up every few seconds, and
/// the occasional empty poll.
pub struct SimulatedSensor {
    tick: u64,
    rng: rand::rngs::ThreadRng,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            tick: 0,
            rng: rand::thread_rng(),
        }
    }
}

impl SensorLink for SimulatedSensor {
    fn start(&mut self, _period_ms: u32) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        self.tick += 1;
        if self.rng.gen::<f64>() < 0.05 {
            return Ok(None);
        }
        let t = self.tick as f64 * 0.1;
        let force = 20.0 + 8.0 * (t * 0.8).sin() + self.rng.gen_range(-0.5..0.5);
        let respiration = if self.tick % 30 == 0 {
            14.0 + self.rng.gen_range(-2.0..2.0)
        } else {
            f64::NAN
        };
        Ok(Some(Reading { force, respiration }))
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_sensor_replays_queue_then_runs_dry() {
        let mut sensor = ManualSensor::new(vec![
            Some(Reading {
                force: 1.0,
                respiration: 12.0,
            }),
            None,
            Some(Reading {
                force: 2.0,
                respiration: f64::NAN,
            }),
        ]);
        assert_eq!(sensor.read().unwrap().unwrap().force, 1.0);
        assert!(sensor.read().unwrap().is_none());
        assert!(sensor.read().unwrap().unwrap().respiration.is_nan());
        assert!(sensor.read().unwrap().is_none());
    }
}
