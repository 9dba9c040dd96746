//! SampleSource — point-in-time runtime measurements.
//!
//! Each sample reads the process and host counters once into a
//! [`RuntimeReading`] and maps it to metrics through a static
//! name → accessor table. Readings that are unavailable on this platform
//! (or failed to read) are `None` and simply produce no metric.
//!
//! ```text
//!   /proc/self/{stat,status}  ─┐
//!   /proc/{meminfo,stat}       ├──▶ RuntimeReading ──▶ GAUGES table ──▶ Vec<Metric>
//!   tokio runtime metrics     ─┘                       + CPUutilization{n}
//!                                                      + RandomValue
//!                                                      + PollCount (+1)
//! ```

use pulse_core::Metric;
use rand::Rng;

/// Counter incremented by one on every sample.
pub const POLL_COUNT: &str = "PollCount";
/// Gauge carrying a fresh random value on every sample.
pub const RANDOM_VALUE: &str = "RandomValue";
/// Prefix of the per-CPU utilization gauges (`CPUutilization1`, ...).
pub const CPU_UTILIZATION_PREFIX: &str = "CPUutilization";

/// Raw counters read during one sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeReading {
    pub resident_bytes: Option<f64>,
    pub virtual_bytes: Option<f64>,
    pub peak_resident_bytes: Option<f64>,
    pub threads: Option<f64>,
    pub minor_faults: Option<f64>,
    pub major_faults: Option<f64>,
    pub user_ticks: Option<f64>,
    pub system_ticks: Option<f64>,
    pub voluntary_switches: Option<f64>,
    pub involuntary_switches: Option<f64>,
    pub total_memory: Option<f64>,
    pub free_memory: Option<f64>,
    pub available_memory: Option<f64>,
    /// Busy share per CPU since boot, in percent.
    pub cpu_utilization: Vec<f64>,
    pub runtime_workers: Option<f64>,
    pub runtime_alive_tasks: Option<f64>,
    pub runtime_global_queue_depth: Option<f64>,
}

type Accessor = fn(&RuntimeReading) -> Option<f64>;

/// Gauge name → accessor. Order is the order metrics are emitted in.
static GAUGES: &[(&str, Accessor)] = &[
    ("ResidentMemory", |r| r.resident_bytes),
    ("VirtualMemory", |r| r.virtual_bytes),
    ("PeakResidentMemory", |r| r.peak_resident_bytes),
    ("Threads", |r| r.threads),
    ("MinorPageFaults", |r| r.minor_faults),
    ("MajorPageFaults", |r| r.major_faults),
    ("UserCPUTicks", |r| r.user_ticks),
    ("SystemCPUTicks", |r| r.system_ticks),
    ("VoluntaryContextSwitches", |r| r.voluntary_switches),
    ("InvoluntaryContextSwitches", |r| r.involuntary_switches),
    ("TotalMemory", |r| r.total_memory),
    ("FreeMemory", |r| r.free_memory),
    ("AvailableMemory", |r| r.available_memory),
    ("RuntimeWorkers", |r| r.runtime_workers),
    ("RuntimeAliveTasks", |r| r.runtime_alive_tasks),
    ("RuntimeGlobalQueueDepth", |r| r.runtime_global_queue_depth),
];

/// Names of every fixed gauge the source may emit.
pub fn gauge_names() -> impl Iterator<Item = &'static str> {
    GAUGES.iter().map(|(name, _)| *name)
}

/// Reads runtime measurements on demand. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleSource;

impl SampleSource {
    pub fn new() -> Self {
        Self
    }

    /// Read the current counters and turn them into metrics.
    pub fn sample(&self) -> Vec<Metric> {
        let mut reading = sys::read();
        read_runtime(&mut reading);
        metrics_from(&reading, rand::rng().random::<f64>())
    }
}

/// Map a reading to metrics. Missing readings and non-finite values are
/// skipped.
pub fn metrics_from(reading: &RuntimeReading, random: f64) -> Vec<Metric> {
    let fixed = GAUGES
        .iter()
        .filter_map(|(name, get)| get(reading).map(|v| (name.to_string(), v)));
    let per_cpu = reading
        .cpu_utilization
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{CPU_UTILIZATION_PREFIX}{}", i + 1), *v));

    let mut metrics: Vec<Metric> = fixed
        .chain(per_cpu)
        .filter(|(_, v)| v.is_finite())
        .map(|(name, v)| Metric::gauge(name, v))
        .collect();

    metrics.push(Metric::gauge(RANDOM_VALUE, random));
    metrics.push(Metric::counter(POLL_COUNT, 1));
    metrics
}

/// Async-runtime counters, when called from inside a tokio runtime.
fn read_runtime(reading: &mut RuntimeReading) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let metrics = handle.metrics();
    reading.runtime_workers = Some(metrics.num_workers() as f64);
    reading.runtime_alive_tasks = Some(metrics.num_alive_tasks() as f64);
    reading.runtime_global_queue_depth = Some(metrics.global_queue_depth() as f64);
}

/// Busy share in percent from cumulative `(busy, total)` tick counts.
pub fn busy_percent(busy: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| busy as f64 * 100.0 / total as f64)
}

// ── Platform readers ───────────────────────────────────────────────

#[cfg(target_os = "linux")]
mod sys {
    use procfs::process::Process;
    use procfs::{Current, CurrentSI, KernelStats, Meminfo};
    use tracing::trace;

    use super::{RuntimeReading, busy_percent};

    pub fn read() -> RuntimeReading {
        let mut reading = RuntimeReading::default();
        read_process(&mut reading);
        read_host(&mut reading);
        reading
    }

    fn read_process(reading: &mut RuntimeReading) {
        let process = match Process::myself() {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, "cannot open /proc/self");
                return;
            }
        };

        match process.stat() {
            Ok(stat) => {
                let page_size = procfs::page_size() as f64;
                reading.resident_bytes = Some(stat.rss as f64 * page_size);
                reading.virtual_bytes = Some(stat.vsize as f64);
                reading.threads = Some(stat.num_threads as f64);
                reading.minor_faults = Some(stat.minflt as f64);
                reading.major_faults = Some(stat.majflt as f64);
                reading.user_ticks = Some(stat.utime as f64);
                reading.system_ticks = Some(stat.stime as f64);
            }
            Err(e) => trace!(error = %e, "cannot read /proc/self/stat"),
        }

        match process.status() {
            // /proc reports these in kB.
            Ok(status) => {
                reading.peak_resident_bytes = status.vmhwm.map(|kb| kb as f64 * 1024.0);
                reading.voluntary_switches = status.voluntary_ctxt_switches.map(|n| n as f64);
                reading.involuntary_switches = status.nonvoluntary_ctxt_switches.map(|n| n as f64);
            }
            Err(e) => trace!(error = %e, "cannot read /proc/self/status"),
        }
    }

    fn read_host(reading: &mut RuntimeReading) {
        match Meminfo::current() {
            Ok(mem) => {
                reading.total_memory = Some(mem.mem_total as f64);
                reading.free_memory = Some(mem.mem_free as f64);
                reading.available_memory = mem.mem_available.map(|v| v as f64);
            }
            Err(e) => trace!(error = %e, "cannot read /proc/meminfo"),
        }

        match KernelStats::current() {
            Ok(stats) => {
                reading.cpu_utilization = stats
                    .cpu_time
                    .iter()
                    .filter_map(|cpu| {
                        let idle = cpu.idle + cpu.iowait.unwrap_or(0);
                        let busy = cpu.user
                            + cpu.nice
                            + cpu.system
                            + cpu.irq.unwrap_or(0)
                            + cpu.softirq.unwrap_or(0)
                            + cpu.steal.unwrap_or(0);
                        busy_percent(busy, busy + idle)
                    })
                    .collect();
            }
            Err(e) => trace!(error = %e, "cannot read /proc/stat"),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::RuntimeReading;

    pub fn read() -> RuntimeReading {
        RuntimeReading::default()
    }
}
