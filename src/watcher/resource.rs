use std::path::PathBuf;

/// Source of CPU pressure readings used to throttle dispatch.
pub trait ResourceMonitor: Send + Sync + std::fmt::Debug {
    /// Current load normalised to `0.0..=1.0` (values above 1.0 mean
    /// oversubscribed). Return `0.0` when unknown.
    fn cpu_load(&self) -> f64;
}

/// One-minute load average from `/proc/loadavg` divided by the available
/// parallelism. Reports `0.0` where the file does not exist.
#[derive(Debug, Clone)]
pub struct LoadAverageMonitor {
    source: PathBuf,
    cpus: usize,
}

impl Default for LoadAverageMonitor {
    fn default() -> Self {
        Self {
            source: PathBuf::from("/proc/loadavg"),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl LoadAverageMonitor {
    /// A monitor reading a loadavg-formatted file, for other mounts or tests.
    pub fn with_source(source: impl Into<PathBuf>, cpus: usize) -> Self {
        Self {
            source: source.into(),
            cpus: cpus.max(1),
        }
    }
}

impl ResourceMonitor for LoadAverageMonitor {
    fn cpu_load(&self) -> f64 {
        let Ok(contents) = std::fs::read_to_string(&self.source) else {
            return 0.0;
        };
        contents
            .split_whitespace()
            .next()
            .and_then(|first| first.parse::<f64>().ok())
            .map(|load| load / self.cpus as f64)
            .unwrap_or(0.0)
    }
}

/// A constant reading. `FixedLoad(0.0)` disables throttling.
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub f64);

impl ResourceMonitor for FixedLoad {
    fn cpu_load(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_average_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("loadavg");
        std::fs::write(&file, "3.00 2.50 2.00 1/234 5678\n").unwrap();
        let monitor = LoadAverageMonitor::with_source(&file, 4);
        assert!((monitor.cpu_load() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_missing_source_reads_zero() {
        let monitor = LoadAverageMonitor::with_source("/nonexistent/loadavg", 2);
        assert_eq!(monitor.cpu_load(), 0.0);
    }
}
