// Simulation time step source

use std::time::Instant;

/// Produces the `delta_time` written into each slot's params buffer.
#[derive(Debug)]
pub enum SimulationClock {
    /// The same step every tick, independent of frame rate.
    Fixed { step: f32 },
    /// Wall-clock time since the previous tick, clamped to `max_step`.
    Measured { last: Option<Instant>, max_step: f32 },
}

impl SimulationClock {
    pub fn fixed(step: f32) -> Self {
        SimulationClock::Fixed { step }
    }

    pub fn measured(max_step: f32) -> Self {
        SimulationClock::Measured {
            last: None,
            max_step,
        }
    }

    /// Delta for the tick about to be recorded.
    pub fn next_step(&mut self) -> f32 {
        let sample = self.sample();
        self.commit(sample);
        sample.step
    }

    /// Measure the next delta without moving the reference point.
    ///
    /// A tick that is abandoned after sampling leaves the clock untouched, so
    /// the next measured delta still covers the skipped interval.
    pub fn sample(&self) -> ClockSample {
        match self {
            SimulationClock::Fixed { step } => ClockSample {
                step: *step,
                at: None,
            },
            SimulationClock::Measured { last, max_step } => {
                let now = Instant::now();
                // First tick has no reference point
                let elapsed = last.map_or(0.0, |t| now.duration_since(t).as_secs_f32());
                ClockSample {
                    step: elapsed.min(*max_step),
                    at: Some(now),
                }
            }
        }
    }

    /// Make `sample` the reference for the next measured delta.
    pub fn commit(&mut self, sample: ClockSample) {
        if let (SimulationClock::Measured { last, .. }, Some(at)) = (self, sample.at) {
            *last = Some(at);
        }
    }
}

/// A delta taken by [`SimulationClock::sample`].
#[derive(Clone, Copy, Debug)]
pub struct ClockSample {
    pub step: f32,
    at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_step_never_changes() {
        let mut clock = SimulationClock::fixed(0.001);
        assert_eq!(clock.next_step(), 0.001);
        assert_eq!(clock.next_step(), 0.001);
    }

    #[test]
    fn measured_step_is_clamped() {
        let mut clock = SimulationClock::measured(0.002);
        assert_eq!(clock.next_step(), 0.0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.next_step(), 0.002);
    }

    #[test]
    fn uncommitted_sample_keeps_the_reference_point() {
        let mut clock = SimulationClock::measured(1.0);
        clock.next_step();
        std::thread::sleep(Duration::from_millis(5));
        let abandoned = clock.sample();
        std::thread::sleep(Duration::from_millis(5));
        let step = clock.next_step();
        assert!(step >= 0.010, "step {step} lost the abandoned interval");
        assert!(step > abandoned.step);
    }
}
