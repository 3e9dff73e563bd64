use serde::Serialize;
use std::process::Command;
use std::sync::OnceLock;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
/// `USER_HZ` when `getconf` cannot tell us.
const FALLBACK_CLOCK_TICKS: f64 = 100.0;

static CLOCK_TICKS: OnceLock<f64> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuUsage {
    /// Percent of total machine capacity.
    pub average: f64,
    pub peak: f64,
    pub samples: usize,
}

type TickReader = fn() -> Option<u64>;

/// Samples this process's CPU usage on a background thread until stopped.
///
/// Linux only: ticks come from `/proc/self/stat` and are scaled by
/// `getconf CLK_TCK`. Where `/proc` is missing, [`CpuSampler::stop`] returns
/// `None` instead of a zero reading. Usage covers the whole process, so
/// concurrent work on other threads is included.
pub struct CpuSampler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<Option<Vec<f64>>>>,
}

impl CpuSampler {
    pub fn start() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::with_reader(interval, read_process_ticks)
    }

    fn with_reader(interval: Duration, read: TickReader) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let cpus = num_cpus::get().max(1) as f64;
        let ticks_per_second = clock_ticks();
        let handle = std::thread::spawn(move || {
            let percent = |ticks: u64, now: Instant, (previous, at): (u64, Instant)| {
                let elapsed = now.duration_since(at).as_secs_f64();
                let busy = ticks.saturating_sub(previous) as f64 / ticks_per_second;
                (elapsed > 0.0).then(|| busy / elapsed / cpus * 100.0)
            };
            let first = (read()?, Instant::now());
            let mut last = first;
            let mut samples = Vec::new();
            // Any message or a dropped sender ends sampling.
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                let Some(ticks) = read() else {
                    continue;
                };
                let now = Instant::now();
                samples.extend(percent(ticks, now, last));
                last = (ticks, now);
            }
            // Windows shorter than one interval get a single reading.
            if samples.is_empty()
                && let Some(ticks) = read()
            {
                samples.extend(percent(ticks, Instant::now(), first));
            }
            Some(samples)
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Signals the thread, waits for it, then summarises its samples.
    /// `None` when the process tick counter could not be read.
    pub fn stop(mut self) -> Option<CpuUsage> {
        self.stop.take();
        let samples = self.handle.take()?.join().ok()??;
        Some(summarize(&samples))
    }
}

/// Kernel clock ticks per second, asked of `getconf` once per process.
pub fn clock_ticks() -> f64 {
    *CLOCK_TICKS.get_or_init(|| {
        Command::new("getconf")
            .arg("CLK_TCK")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| parse_clock_ticks(&String::from_utf8_lossy(&output.stdout)))
            .unwrap_or(FALLBACK_CLOCK_TICKS)
    })
}

fn parse_clock_ticks(output: &str) -> Option<f64> {
    let ticks: u32 = output.trim().parse().ok()?;
    (ticks > 0).then_some(f64::from(ticks))
}

fn summarize(samples: &[f64]) -> CpuUsage {
    if samples.is_empty() {
        return CpuUsage::default();
    }
    CpuUsage {
        average: samples.iter().sum::<f64>() / samples.len() as f64,
        peak: samples.iter().copied().fold(0.0, f64::max),
        samples: samples.len(),
    }
}

fn read_process_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_stat_ticks(&stat)
}

/// `utime + stime` from a `/proc/<pid>/stat` line. Fields are counted after
/// the closing parenthesis because the command name may contain spaces.
fn parse_stat_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields = rest.split_whitespace().collect::<Vec<_>>();
    // rest starts at field 3 (state); utime is field 14, stime field 15.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_line_with_spaces_in_name() {
        let stat =
            "4242 (my (odd) proc) R 1 4242 4242 0 -1 4194304 120 0 0 0 37 5 0 0 20 0 1 0 100 0 0";
        assert_eq!(parse_stat_ticks(stat), Some(42));
        assert_eq!(parse_stat_ticks("garbage"), None);
    }

    #[test]
    fn clock_tick_output_is_validated() {
        assert_eq!(parse_clock_ticks("100\n"), Some(100.0));
        assert_eq!(parse_clock_ticks("1000"), Some(1000.0));
        assert_eq!(parse_clock_ticks("0"), None);
        assert_eq!(parse_clock_ticks("undefined"), None);
        assert!(clock_ticks() > 0.0);
    }

    #[test]
    fn empty_samples_report_zero() {
        assert_eq!(summarize(&[]), CpuUsage::default());
        let usage = summarize(&[10.0, 30.0, 20.0]);
        assert_eq!(usage.average, 20.0);
        assert_eq!(usage.peak, 30.0);
        assert_eq!(usage.samples, 3);
    }

    #[test]
    fn unreadable_counter_reports_unavailable() {
        let sampler = CpuSampler::with_reader(Duration::from_millis(5), || None);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sampler.stop(), None);
    }

    #[test]
    fn short_window_still_gets_a_reading() {
        let sampler = CpuSampler::with_reader(Duration::from_secs(60), || Some(3));
        std::thread::sleep(Duration::from_millis(5));
        let stopping = Instant::now();
        let usage = sampler.stop().unwrap();
        assert!(stopping.elapsed() < Duration::from_secs(5));
        assert_eq!(usage.samples, 1);
        assert_eq!(usage.average, 0.0);
    }

    #[test]
    fn sampler_stops_cooperatively() {
        let sampler = CpuSampler::with_reader(Duration::from_millis(5), || Some(7));
        std::thread::sleep(Duration::from_millis(30));
        let usage = sampler.stop().unwrap();
        assert!(usage.samples > 0);
        assert_eq!(usage.average, 0.0);
        assert_eq!(usage.peak, 0.0);
    }
}
