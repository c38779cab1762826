//! Sources of host and process gauges.

use sysinfo::{Pid, System};

/// A source of gauge readings for the sampler.
pub trait Probe: Send {
    /// Take one reading of every gauge in the catalog.
    fn read(&mut self) -> Vec<(&'static str, f64)>;
}

/// Host and process telemetry via `sysinfo`.
///
/// Catalog:
///
///   - `Alloc`, `Sys` -- resident and virtual memory of this process, bytes
///   - `ProcessCPU` -- CPU usage of this process, percent
///   - `TotalMemory`, `FreeMemory`, `UsedMemory`, `AvailableMemory` -- host
///     memory, bytes
///   - `CPUutilization1` -- global host CPU usage, percent
///   - `RandomValue` -- uniform in [0, 1), handy to see values move
pub struct SysProbe {
    sys: System,
    pid: Option<Pid>,
}

impl Default for SysProbe {
    fn default() -> SysProbe {
        SysProbe::new()
    }
}

impl SysProbe {
    /// A probe for the current process on the current host.
    pub fn new() -> SysProbe {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("process telemetry unavailable: {}", e);
                None
            }
        };
        SysProbe {
            sys: System::new(),
            pid,
        }
    }
}

impl Probe for SysProbe {
    fn read(&mut self) -> Vec<(&'static str, f64)> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu();

        let mut gauges = Vec::with_capacity(10);
        if let Some(pid) = self.pid {
            if self.sys.refresh_process(pid) {
                if let Some(process) = self.sys.process(pid) {
                    gauges.push(("Alloc", process.memory() as f64));
                    gauges.push(("Sys", process.virtual_memory() as f64));
                    gauges.push(("ProcessCPU", f64::from(process.cpu_usage())));
                }
            }
        }
        gauges.push(("TotalMemory", self.sys.total_memory() as f64));
        gauges.push(("FreeMemory", self.sys.free_memory() as f64));
        gauges.push(("UsedMemory", self.sys.used_memory() as f64));
        gauges.push(("AvailableMemory", self.sys.available_memory() as f64));
        gauges.push((
            "CPUutilization1",
            f64::from(self.sys.global_cpu_info().cpu_usage()),
        ));
        gauges.push(("RandomValue", rand::random::<f64>()));
        gauges
    }
}
