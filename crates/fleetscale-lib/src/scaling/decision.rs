//! Hysteresis over fleet readings

use crate::models::{AggregateReading, Decision};

/// One step of the overload streak
///
/// A reading strictly above `threshold` extends the streak, anything else
/// shortens it (never below zero). Reaching `trigger_count` resets the
/// streak and yields [`Decision::ScaleUp`].
pub fn next_streak(streak: u32, average: f64, threshold: f64, trigger_count: u32) -> (u32, Decision) {
    if average > threshold {
        let streak = streak.saturating_add(1);
        if streak >= trigger_count {
            (0, Decision::ScaleUp)
        } else {
            (streak, Decision::Hold)
        }
    } else {
        (streak.saturating_sub(1), Decision::Hold)
    }
}

/// Stateful wrapper around [`next_streak`]
#[derive(Debug, Clone)]
pub struct ScaleDecisionEngine {
    threshold: f64,
    trigger_count: u32,
    streak: u32,
}

impl ScaleDecisionEngine {
    pub fn new(threshold: f64, trigger_count: u32) -> Self {
        Self {
            threshold,
            trigger_count: trigger_count.max(1),
            streak: 0,
        }
    }

    pub fn observe(&mut self, reading: &AggregateReading) -> Decision {
        let (streak, decision) = next_streak(
            self.streak,
            reading.average_percent,
            self.threshold,
            self.trigger_count,
        );
        self.streak = streak;
        decision
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }
}
