//! Cumulative network counters summed over all interfaces.

use sysinfo::Networks;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

impl NetworkCounters {
    pub fn read() -> Self {
        let networks = Networks::new_with_refreshed_list();
        let mut c = NetworkCounters::default();
        for (_iface, data) in &networks {
            c.bytes_sent = c.bytes_sent.saturating_add(data.total_transmitted());
            c.bytes_recv = c.bytes_recv.saturating_add(data.total_received());
        }
        c
    }

    pub fn sent_mb(&self) -> f64 {
        self.bytes_sent as f64 / BYTES_PER_MB
    }

    pub fn recv_mb(&self) -> f64 {
        self.bytes_recv as f64 / BYTES_PER_MB
    }
}
