use std::collections::VecDeque;

/// Mean of the last `N` samples.
#[derive(Debug, Clone)]
pub struct RunningAverage<const N: usize> {
    window: VecDeque<f32>,
}

impl<const N: usize> Default for RunningAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RunningAverage<N> {
    const NON_EMPTY: () = assert!(N > 0, "running average needs a non-empty window");

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;
        Self {
            window: VecDeque::with_capacity(N),
        }
    }

    /// Add a sample, evicting the oldest once the window is full, and return
    /// the updated mean.
    pub fn offer(&mut self, value: f32) -> Option<f32> {
        if self.window.len() == N {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.current()
    }

    /// `None` until `N` samples were offered.
    pub fn current(&self) -> Option<f32> {
        if self.window.len() < N {
            return None;
        }
        Some(self.window.iter().sum::<f32>() / N as f32)
    }
}
