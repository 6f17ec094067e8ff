//! Live host actions backed by the collector's sysinfo handle.

use super::{ActionExecutor, DiskCleanupPlan, MemoryReclaim};
use crate::collectors::{HostCollector, ProcessSample};
use crate::error::ActionError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

const MAX_FILES_SCANNED: usize = 5_000;
const MAX_DEPTH: usize = 4;

pub struct HostActions {
    collector: Arc<HostCollector>,
    /// Wait between trimming and re-reading memory
    settle: Duration,
    cleanup_roots: Vec<PathBuf>,
}

impl HostActions {
    pub fn new(collector: Arc<HostCollector>) -> Self {
        Self {
            collector,
            settle: Duration::from_millis(500),
            cleanup_roots: Self::default_roots(),
        }
    }

    pub fn with_cleanup_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.cleanup_roots = roots;
        self
    }

    fn default_roots() -> Vec<PathBuf> {
        let mut p = vec![std::env::temp_dir()];
        if let Some(cache) = dirs::cache_dir() {
            p.push(cache);
        }
        p
    }

    /// Bytes of regular files under the cleanup roots, bounded in depth and count.
    pub fn reclaimable_bytes(&self) -> u64 {
        let mut seen = 0usize;
        let mut total = 0u64;
        for root in self.cleanup_roots.iter().filter(|r| r.exists()) {
            for entry in WalkDir::new(root)
                .max_depth(MAX_DEPTH)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if seen >= MAX_FILES_SCANNED {
                    return total;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                seen += 1;
                if let Ok(m) = entry.metadata() {
                    total = total.saturating_add(m.len());
                }
            }
        }
        total
    }
}

/// Return freed heap pages of this process to the OS.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() -> bool {
    // SAFETY: malloc_trim only walks the allocator's own arenas.
    unsafe { libc::malloc_trim(0) == 1 }
}

#[cfg(windows)]
fn trim_heap() -> bool {
    use windows::Win32::System::Threading::{GetCurrentProcess, SetProcessWorkingSetSize};
    // SAFETY: (usize::MAX, usize::MAX) asks the OS to empty our own working set.
    unsafe { SetProcessWorkingSetSize(GetCurrentProcess(), usize::MAX, usize::MAX).is_ok() }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), windows)))]
fn trim_heap() -> bool {
    false
}

impl ActionExecutor for HostActions {
    fn reclaim_memory(&self) -> Result<MemoryReclaim, ActionError> {
        let before = self
            .collector
            .memory_percent()
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        let trimmed = trim_heap();
        std::thread::sleep(self.settle);
        let after = self
            .collector
            .memory_percent()
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        debug!(before, after, trimmed, "memory reclaim");
        Ok(MemoryReclaim {
            memory_before: before,
            memory_after: after,
            freed_percent: (before - after).max(0.0),
        })
    }

    fn list_high_cpu_processes(&self, limit: usize) -> Result<Vec<ProcessSample>, ActionError> {
        self.collector
            .high_cpu_processes(limit)
            .map_err(|e| ActionError::Failed(e.to_string()))
    }

    fn suggest_disk_cleanup(&self) -> Result<DiskCleanupPlan, ActionError> {
        Ok(DiskCleanupPlan {
            recommendation: "Run junk file cleaner to free up disk space".to_string(),
            suggested_actions: vec![
                "Clear temporary files".to_string(),
                "Remove browser cache".to_string(),
                "Uninstall unused applications".to_string(),
            ],
            reclaimable_bytes: self.reclaimable_bytes(),
        })
    }

    fn count_processes(&self) -> Result<usize, ActionError> {
        self.collector
            .process_count()
            .map_err(|e| ActionError::Failed(e.to_string()))
    }
}
