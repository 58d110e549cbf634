//! Periodic process memory statistics
//!
//! Logs resident and virtual size at debug level until cancelled. Sizes come
//! from `/proc/self/status`; on platforms without procfs nothing is logged.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Memory usage of the current process, in kilobytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub resident_kb: u64,
    pub virtual_kb: u64,
}

impl MemorySnapshot {
    /// Read the current process's memory usage
    pub fn current() -> Option<Self> {
        let content = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_status_content(&content)
    }
}

/// Parse the content of a `/proc/<pid>/status` file
pub fn parse_status_content(content: &str) -> Option<MemorySnapshot> {
    let mut resident_kb = None;
    let mut virtual_kb = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "VmRSS" => &mut resident_kb,
            "VmSize" => &mut virtual_kb,
            _ => continue,
        };
        *slot = value
            .split_whitespace()
            .next()
            .and_then(|kb| kb.parse::<u64>().ok());
    }

    Some(MemorySnapshot {
        resident_kb: resident_kb?,
        virtual_kb: virtual_kb?,
    })
}

/// Log memory statistics every `interval` until `ct` is cancelled
pub async fn report_memory(interval: Duration, ct: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(snapshot) = MemorySnapshot::current() {
                    debug!(
                        resident_kb = snapshot.resident_kb,
                        virtual_kb = snapshot.virtual_kb,
                        "Memory statistics"
                    );
                }
            }
        }
    }

    debug!("Memory statistics reporter stopped");
}
