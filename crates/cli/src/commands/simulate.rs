//! Offline replay of the scale-up decision

use anyhow::{bail, Result};
use colored::Colorize;
use fleetscale_lib::{models::Decision, scaling::next_streak};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{color_percent, format_percent, print_json, print_table, OutputFormat};

/// One replayed reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStep {
    pub average_percent: f64,
    pub streak: u32,
    pub decision: Decision,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Average")]
    average: String,
    #[tabled(rename = "Streak")]
    streak: u32,
    #[tabled(rename = "Decision")]
    decision: String,
}

/// Feed `readings` through the streak rule starting from zero
pub fn simulate(readings: &[f64], threshold: f64, trigger_count: u32) -> Vec<SimulationStep> {
    let trigger_count = trigger_count.max(1);
    let mut streak = 0;
    readings
        .iter()
        .map(|&average_percent| {
            let (next, decision) = next_streak(streak, average_percent, threshold, trigger_count);
            streak = next;
            SimulationStep {
                average_percent,
                streak,
                decision,
            }
        })
        .collect()
}

pub fn run(readings: &[f64], threshold: f64, trigger_count: u32, format: OutputFormat) -> Result<()> {
    if !(threshold > 0.0 && threshold <= 100.0) {
        bail!("threshold must be in (0, 100], got {}", threshold);
    }
    if trigger_count == 0 {
        bail!("trigger count must be at least 1");
    }

    let steps = simulate(readings, threshold, trigger_count);

    if format == OutputFormat::Json {
        return print_json(&steps);
    }

    let scale_ups = steps
        .iter()
        .filter(|s| s.decision == Decision::ScaleUp)
        .count();
    let rows: Vec<StepRow> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| StepRow {
            index: i + 1,
            average: color_percent(step.average_percent, threshold),
            streak: step.streak,
            decision: match step.decision {
                Decision::ScaleUp => "scale up".red().bold().to_string(),
                Decision::Hold => "hold".to_string(),
            },
        })
        .collect();

    println!(
        "Threshold {} after {} consecutive readings",
        format_percent(threshold),
        trigger_count
    );
    print_table(rows);
    println!("\nScale-ups: {}", scale_ups);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_per_reading() {
        let steps = simulate(&[85.0, 90.0, 82.0, 50.0], 80.0, 3);
        let streaks: Vec<u32> = steps.iter().map(|s| s.streak).collect();
        let decisions: Vec<Decision> = steps.iter().map(|s| s.decision).collect();

        assert_eq!(streaks, vec![1, 2, 0, 0]);
        assert_eq!(
            decisions,
            vec![Decision::Hold, Decision::Hold, Decision::ScaleUp, Decision::Hold]
        );
    }

    #[test]
    fn test_dip_shortens_streak() {
        let steps = simulate(&[85.0, 90.0, 70.0, 95.0, 96.0], 80.0, 3);
        let streaks: Vec<u32> = steps.iter().map(|s| s.streak).collect();

        assert_eq!(streaks, vec![1, 2, 1, 2, 0]);
        assert_eq!(steps[4].decision, Decision::ScaleUp);
    }

    #[test]
    fn test_reading_at_threshold_is_not_overload() {
        let steps = simulate(&[80.0, 80.0, 80.0], 80.0, 1);
        assert!(steps.iter().all(|s| s.decision == Decision::Hold));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(run(&[50.0], 0.0, 3, OutputFormat::Json).is_err());
        assert!(run(&[50.0], 120.0, 3, OutputFormat::Json).is_err());
        assert!(run(&[50.0], 80.0, 0, OutputFormat::Json).is_err());
    }
}
