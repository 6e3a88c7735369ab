use std::collections::VecDeque;
use std::time::Instant;

use crate::DecideError;

/// Samples kept for the difference; three gives a central difference.
const HISTORY: usize = 3;

/// Running derivative of a sampled signal in units per second, smoothed with
/// an exponential moving average.
///
/// `alpha` close to 1 follows the raw difference, small values trade reaction
/// time for stability.
#[derive(Debug, Clone)]
pub struct TabularDerivative {
    alpha: f32,
    smoothed: Option<f32>,
    history: VecDeque<(Instant, f32)>,
}

impl TabularDerivative {
    pub fn new(alpha: f32) -> Result<Self, DecideError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(DecideError::Alpha(alpha));
        }
        Ok(Self {
            alpha,
            smoothed: None,
            history: VecDeque::with_capacity(HISTORY),
        })
    }

    /// Offer a sample taken now.
    pub fn update(&mut self, value: f32) -> Result<Option<f32>, DecideError> {
        self.update_at(value, Instant::now())
    }

    /// Offer a sample taken at `at`; returns the smoothed derivative once two
    /// samples are known.
    pub fn update_at(&mut self, value: f32, at: Instant) -> Result<Option<f32>, DecideError> {
        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((at, value));

        let Some(raw) = self.raw()? else {
            return Ok(None);
        };
        let next = match self.smoothed {
            None => raw,
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
        };
        self.smoothed = Some(next);
        Ok(self.smoothed)
    }

    pub fn result(&self) -> Option<f32> {
        self.smoothed
    }

    fn raw(&self) -> Result<Option<f32>, DecideError> {
        let (Some(&(t0, v0)), Some(&(t1, v1))) = (self.history.front(), self.history.back()) else {
            return Ok(None);
        };
        if self.history.len() < 2 {
            return Ok(None);
        }
        // `Instant` never goes backwards, but equal instants give a zero step.
        let dt = t1.checked_duration_since(t0).map_or(0.0, |d| d.as_secs_f64());
        if dt <= 0.0 {
            return Err(DecideError::ClockRegression { dt_secs: dt });
        }
        Ok(Some(((v1 - v0) as f64 / dt) as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Feed {
        derivative: TabularDerivative,
        now: Instant,
    }

    impl Feed {
        fn new(alpha: f32) -> Self {
            Self {
                derivative: TabularDerivative::new(alpha).expect("alpha"),
                now: Instant::now(),
            }
        }

        fn push(&mut self, value: f32) -> Option<f32> {
            self.now += Duration::from_millis(500);
            self.derivative.update_at(value, self.now).expect("update")
        }
    }

    #[test]
    fn sign_follows_trend_without_smoothing() {
        let mut feed = Feed::new(1.0);
        assert_eq!(feed.push(1.0), None);
        assert!(feed.push(2.0).expect("rate") > 0.0);
        assert!(feed.push(3.0).expect("rate") > 0.0);
        for _ in 0..6 {
            feed.push(3.0);
        }
        assert!(feed.derivative.result().expect("rate").abs() < 0.001);
        feed.push(2.0);
        feed.push(1.0);
        assert!(feed.push(0.0).expect("rate") < 0.0);
    }

    #[test]
    fn smoothed_rate_settles_at_zero() {
        let mut feed = Feed::new(0.3);
        for value in [40.0, 44.0, 48.0] {
            feed.push(value);
        }
        assert!(feed.derivative.result().expect("rate") > 0.0);
        for _ in 0..40 {
            feed.push(48.0);
        }
        assert!(feed.derivative.result().expect("rate").abs() < 0.001);
        feed.push(47.0);
        feed.push(46.0);
        assert!(feed.push(45.0).expect("rate") < 0.0);
    }

    #[test]
    fn raw_rate_is_per_second() {
        let mut feed = Feed::new(1.0);
        feed.push(10.0);
        // One degree per half second.
        assert_eq!(feed.push(11.0), Some(2.0));
    }

    #[test]
    fn identical_timestamps_are_rejected() {
        let mut derivative = TabularDerivative::new(0.5).expect("alpha");
        let at = Instant::now();
        derivative.update_at(1.0, at).expect("first");
        assert!(matches!(
            derivative.update_at(2.0, at),
            Err(DecideError::ClockRegression { .. })
        ));
    }

    #[test]
    fn alpha_must_be_in_range() {
        assert!(TabularDerivative::new(0.0).is_err());
        assert!(TabularDerivative::new(1.5).is_err());
        assert!(TabularDerivative::new(f32::NAN).is_err());
    }
}
