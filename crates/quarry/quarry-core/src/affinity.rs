//! Thread-to-CPU pinning.
//!
//! CPU index `0` means "leave the thread unpinned"; this matches the command
//! line convention where the default affinity value is zero.

use std::io;

pub trait AffinitySetter: Send + Sync {
    /// Pins the calling thread to `cpu`. A `cpu` of zero is a no-op.
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()>;
}

/// Hard pin through `sched_setaffinity` on Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAffinity;

impl AffinitySetter for CpuAffinity {
    #[cfg(target_os = "linux")]
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()> {
        if cpu == 0 {
            return Ok(());
        }
        // SAFETY: cpu_set_t is plain data; a zeroed set is the empty set and
        // CPU_SET only writes inside it. pid 0 targets the calling thread.
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()> {
        if cpu == 0 {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "thread pinning is only supported on linux",
        ))
    }
}

/// Ignores every pin request. Used by tests and on hosts without isolated cores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAffinity;

impl AffinitySetter for NoAffinity {
    fn pin_current_thread(&self, _cpu: usize) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_zero_is_unpinned() {
        assert!(CpuAffinity.pin_current_thread(0).is_ok());
        assert!(NoAffinity.pin_current_thread(7).is_ok());
    }
}
