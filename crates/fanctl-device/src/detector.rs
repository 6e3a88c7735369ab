use std::fmt::Debug;

use tracing::debug;

use crate::DeviceError;

/// One-shot choice among candidate commands (or any candidate value).
///
/// Starts unresolved with a candidate list, is resolved exactly once and then
/// always yields the same value. Using it before resolution, or resolving it
/// down to zero candidates, is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProperCommandDetector<T> {
    Unresolved(Vec<T>),
    Resolved(T),
}

impl<T: Clone + Debug> ProperCommandDetector<T> {
    pub fn new(candidates: Vec<T>) -> Self {
        ProperCommandDetector::Unresolved(candidates)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ProperCommandDetector::Resolved(_))
    }

    /// The resolved value.
    pub fn get(&self) -> Result<&T, DeviceError> {
        match self {
            ProperCommandDetector::Resolved(value) => Ok(value),
            ProperCommandDetector::Unresolved(_) => Err(DeviceError::NotDetected),
        }
    }

    /// Keep the first candidate accepted by `predicate`. A single candidate
    /// is accepted without asking; an already resolved detector is returned
    /// as is.
    pub fn detect_one_by_one<F>(&mut self, what: &'static str, mut predicate: F) -> Result<&T, DeviceError>
    where
        F: FnMut(&T) -> Result<bool, DeviceError>,
    {
        if let ProperCommandDetector::Unresolved(candidates) = self {
            let chosen = match candidates.as_slice() {
                [] => return Err(empty(what)),
                [single] => single.clone(),
                many => {
                    let mut found = None;
                    for candidate in many {
                        if predicate(candidate)? {
                            found = Some(candidate.clone());
                            break;
                        }
                    }
                    found.ok_or_else(|| DeviceError::Detection {
                        what,
                        reason: format!("none of {} candidates matched", many.len()),
                    })?
                }
            };
            debug!(what, chosen = ?chosen, "detected");
            *self = ProperCommandDetector::Resolved(chosen);
        }
        self.get()
    }

    /// Let `filter` narrow all candidates at once; exactly one must remain.
    pub fn detect_at_once<F>(&mut self, what: &'static str, filter: F) -> Result<&T, DeviceError>
    where
        F: FnOnce(Vec<T>) -> Result<Vec<T>, DeviceError>,
    {
        if let ProperCommandDetector::Unresolved(candidates) = self {
            if candidates.is_empty() {
                return Err(empty(what));
            }
            let mut left = if candidates.len() > 1 {
                filter(candidates.clone())?
            } else {
                candidates.clone()
            };
            if left.len() != 1 {
                return Err(DeviceError::Detection {
                    what,
                    reason: format!("{} candidates left, expected exactly one", left.len()),
                });
            }
            let chosen = left.remove(0);
            debug!(what, chosen = ?chosen, "detected");
            *self = ProperCommandDetector::Resolved(chosen);
        }
        self.get()
    }
}

fn empty(what: &'static str) -> DeviceError {
    DeviceError::Detection {
        what,
        reason: "no candidates".into(),
    }
}
