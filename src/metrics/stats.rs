use std::alloc::{GlobalAlloc, Layout, System as SystemAlloc};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use sysinfo::{Pid, ProcessRefreshKind, System};

static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);
static TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// Global allocator that keeps heap counters for the sampler.
///
/// Install it from the binary:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: runstat_agent::CountingAllocator = runstat_agent::CountingAllocator;
/// ```
///
/// Without it every heap counter reads zero.
pub struct CountingAllocator;

fn record_alloc(size: usize) {
    let size = size as u64;
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
    TOTAL_BYTES.fetch_add(size, Ordering::Relaxed);
    MALLOCS.fetch_add(1, Ordering::Relaxed);
}

fn record_free(size: usize) {
    LIVE_BYTES.fetch_sub(size as u64, Ordering::Relaxed);
    FREES.fetch_add(1, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        SystemAlloc.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = SystemAlloc.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_free(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeapCounters {
    pub live_bytes: u64,
    pub peak_bytes: u64,
    pub total_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
}

impl HeapCounters {
    pub fn current() -> Self {
        HeapCounters {
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
            peak_bytes: PEAK_BYTES.load(Ordering::Relaxed),
            total_bytes: TOTAL_BYTES.load(Ordering::Relaxed),
            mallocs: MALLOCS.load(Ordering::Relaxed),
            frees: FREES.load(Ordering::Relaxed),
        }
    }

    pub fn live_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProcessCounters {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub cpu_usage: f32,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub run_time_secs: u64,
}

/// One snapshot of the runtime counters a batch is built from.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RuntimeStats {
    pub heap: HeapCounters,
    pub process: ProcessCounters,
}

pub type Extractor = fn(&RuntimeStats) -> f64;

/// Gauge table, in emission order.
pub static GAUGES: &[(&str, Extractor)] = &[
    ("Alloc", |s| s.heap.live_bytes as f64),
    ("TotalAlloc", |s| s.heap.total_bytes as f64),
    ("Mallocs", |s| s.heap.mallocs as f64),
    ("Frees", |s| s.heap.frees as f64),
    ("HeapAlloc", |s| s.heap.live_bytes as f64),
    ("HeapObjects", |s| s.heap.live_objects() as f64),
    ("HeapPeak", |s| s.heap.peak_bytes as f64),
    ("Sys", |s| s.process.resident_bytes as f64),
    ("VirtualMemory", |s| s.process.virtual_bytes as f64),
    ("CPUUsage", |s| s.process.cpu_usage as f64),
    ("DiskReadBytes", |s| s.process.disk_read_bytes as f64),
    ("DiskWrittenBytes", |s| s.process.disk_written_bytes as f64),
    ("RunTime", |s| s.process.run_time_secs as f64),
];

/// Source of runtime snapshots. Reading must not fail; implementations fall
/// back to zeroed counters.
pub trait StatsSource: Send + 'static {
    fn snapshot(&mut self) -> RuntimeStats;
}

/// Reads heap counters from [`CountingAllocator`] and process counters from
/// `sysinfo` for the current pid.
pub struct ProcessStats {
    system: System,
    pid: Option<Pid>,
}

impl ProcessStats {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                debug!("current pid unavailable, process counters disabled: {}", err);
                None
            }
        };
        ProcessStats {
            system: System::new(),
            pid,
        }
    }

    fn process_counters(&mut self) -> ProcessCounters {
        let Some(pid) = self.pid else {
            return ProcessCounters::default();
        };

        if !self
            .system
            .refresh_process_specifics(pid, ProcessRefreshKind::everything())
        {
            debug!("process {} not found by sysinfo", pid);
            return ProcessCounters::default();
        }

        match self.system.process(pid) {
            Some(process) => {
                let disk = process.disk_usage();
                ProcessCounters {
                    resident_bytes: process.memory(),
                    virtual_bytes: process.virtual_memory(),
                    cpu_usage: process.cpu_usage(),
                    disk_read_bytes: disk.total_read_bytes,
                    disk_written_bytes: disk.total_written_bytes,
                    run_time_secs: process.run_time(),
                }
            }
            None => ProcessCounters::default(),
        }
    }
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for ProcessStats {
    fn snapshot(&mut self) -> RuntimeStats {
        RuntimeStats {
            heap: HeapCounters::current(),
            process: self.process_counters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_names_are_unique() {
        let mut names: Vec<&str> = GAUGES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), GAUGES.len());
    }

    #[test]
    fn extractors_read_the_snapshot() {
        let stats = RuntimeStats {
            heap: HeapCounters {
                live_bytes: 1024,
                peak_bytes: 4096,
                total_bytes: 8192,
                mallocs: 10,
                frees: 4,
            },
            process: ProcessCounters {
                resident_bytes: 1 << 20,
                ..Default::default()
            },
        };
        let lookup = |wanted: &str| {
            GAUGES
                .iter()
                .find(|(name, _)| *name == wanted)
                .map(|(_, extract)| extract(&stats))
        };

        assert_eq!(lookup("Alloc"), Some(1024.0));
        assert_eq!(lookup("HeapObjects"), Some(6.0));
        assert_eq!(lookup("Sys"), Some(1_048_576.0));
        assert_eq!(lookup("NoSuchGauge"), None);
    }

    #[test]
    fn process_stats_never_fails() {
        let mut source = ProcessStats::new();
        let first = source.snapshot();
        let second = source.snapshot();
        assert!(second.process.run_time_secs >= first.process.run_time_secs);
    }
}
