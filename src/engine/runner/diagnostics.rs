use std::fmt::{Display, Formatter};
use std::time::Duration;

use console::Style;

use crate::engine::TaskExecution;

/// Timing of every leaf task executed during a run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Task name and execution metrics, in completion order.
    pub executions: Vec<(String, TaskExecution)>,
}

impl Diagnostics {
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Sum of all task durations. Parallel tasks overlap, so this can exceed
    /// the wall-clock time of the run.
    pub fn total(&self) -> Duration {
        self.executions.iter().map(|(_, exec)| exec.duration).sum()
    }

    pub fn get(&self, name: &str) -> Option<&TaskExecution> {
        self.executions
            .iter()
            .find(|(task, _)| task == name)
            .map(|(_, exec)| exec)
    }
}

/// Renders one line per task, ordered by start time, with a bar colored by
/// relative duration.
///
/// * **Green**: Fast
/// * **Yellow**: Moderate
/// * **Red**: Slow
impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        const WIDTH: f64 = 30.0;

        let mut rows: Vec<_> = self.executions.iter().collect();
        rows.sort_by_key(|(_, exec)| exec.start);

        let longest = rows
            .iter()
            .map(|(_, exec)| exec.duration.as_secs_f64())
            .fold(0.0, f64::max);

        let name_width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

        for (name, exec) in rows {
            let t = if longest > 0.0 {
                exec.duration.as_secs_f64() / longest
            } else {
                0.0
            };

            let style = if t < 0.33 {
                Style::new().green()
            } else if t < 0.66 {
                Style::new().yellow()
            } else {
                Style::new().red()
            };

            let bar = "=".repeat(((t * WIDTH).round() as usize).max(1));
            writeln!(
                f,
                "{name:<name_width$}  {:>10}  {}",
                format!("{:.2?}", exec.duration),
                style.apply_to(bar),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn exec(start: Instant, millis: u64) -> TaskExecution {
        TaskExecution {
            start,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn summary_is_ordered_by_start() {
        let t0 = Instant::now();
        let diagnostics = Diagnostics {
            executions: vec![
                ("styles".into(), exec(t0 + Duration::from_millis(5), 10)),
                ("clean".into(), exec(t0, 5)),
            ],
        };

        let text = diagnostics.to_string();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("clean "));
        assert!(lines[1].starts_with("styles"));
        assert_eq!(diagnostics.total(), Duration::from_millis(15));
        assert_eq!(diagnostics.get("clean").map(|e| e.duration), Some(Duration::from_millis(5)));
    }

    #[test]
    fn empty_summary_renders_nothing() {
        assert_eq!(Diagnostics::default().to_string(), "");
    }
}
