use crate::DecideError;

/// One row of the poll table: up to `max_temperature` read the hardware every
/// `divisor` loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub max_temperature: u16,
    pub divisor: u32,
}

/// Every hardware read wakes the embedded controller, so a cool (idle)
/// machine is polled rarely and a hot (busy) one often.
const DEFAULT_TABLE: [(u16, u32); 11] = [
    // No reading yet: do not wait.
    (0, 1),
    (39, 35),
    (42, 23),
    (45, 17),
    (47, 15),
    (50, 13),
    (60, 10),
    (65, 7),
    (70, 4),
    (75, 3),
    (80, 2),
];

/// Picks how many loop iterations to skip between real hardware reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollScheduler {
    table: Vec<PollStep>,
    fastest: u32,
}

impl Default for PollScheduler {
    fn default() -> Self {
        let table: Vec<PollStep> = DEFAULT_TABLE
            .iter()
            .map(|&(max_temperature, divisor)| PollStep {
                max_temperature,
                divisor,
            })
            .collect();
        Self { table, fastest: 1 }
    }
}

impl PollScheduler {
    /// The table must be non-empty, sorted by temperature and free of zero
    /// divisors.
    pub fn new(table: Vec<PollStep>) -> Result<Self, DecideError> {
        if let Some(index) = table.iter().position(|s| s.divisor == 0) {
            return Err(DecideError::ZeroDivisor { index });
        }
        if let Some(index) = table
            .windows(2)
            .position(|w| w[1].max_temperature < w[0].max_temperature)
        {
            return Err(DecideError::UnsortedPollTable { index: index + 1 });
        }
        let fastest = table
            .iter()
            .map(|s| s.divisor)
            .min()
            .ok_or(DecideError::EmptyPollTable)?;
        Ok(Self { table, fastest })
    }

    pub fn table(&self) -> &[PollStep] {
        &self.table
    }

    /// Divisor for the last known CPU temperature. After a failed ping the
    /// fastest divisor is used.
    pub fn divisor(&self, cpu_temperature: u16, ping_ok: bool) -> u32 {
        if !ping_ok {
            return self.fastest;
        }
        let idx = self
            .table
            .partition_point(|s| s.max_temperature < cpu_temperature);
        self.table
            .get(idx)
            .or_else(|| self.table.last())
            .map_or(self.fastest, |s| s.divisor)
    }
}
