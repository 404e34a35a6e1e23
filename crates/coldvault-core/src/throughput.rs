use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

/// Bytes moved over a wall-clock interval. Attached to lifecycle events and
/// job summaries.
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return self.bytes as f64;
        }
        self.bytes as f64 / secs
    }
}

impl Display for Throughput {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} in {:.2?} ({}/s)",
            human_bytes(self.bytes as f64),
            self.elapsed,
            human_bytes(self.bytes_per_sec())
        )
    }
}

/// Render a byte count with a binary-unit suffix.
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_binary_units() {
        assert_eq!(human_bytes(512.0), "512 B");
        assert_eq!(human_bytes(2048.0), "2.0 KiB");
        assert_eq!(human_bytes(3.0 * 1024.0 * 1024.0), "3.0 MiB");
    }

    #[test]
    fn rate_is_bytes_over_elapsed() {
        let t = Throughput::new(1000, Duration::from_secs(2));
        assert!((t.bytes_per_sec() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let t = Throughput::new(42, Duration::ZERO);
        assert!((t.bytes_per_sec() - 42.0).abs() < f64::EPSILON);
    }
}
