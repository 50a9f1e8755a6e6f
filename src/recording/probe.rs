/**
 * ============================================================================
 * PROBES MODULE
 * ============================================================================
 * 
 * PURPOSE: Disk usage and SoC temperature readings for the engine loop
 * 
 * Both probes return None when a reading is unavailable. The engine treats
 * that as "unknown" for the current segment only.
 * 
 * ============================================================================
 */

use std::path::Path;
use sysinfo::{Components, Disks};

pub trait DiskProbe: Send {
    // Percent of the filesystem holding `path` that is in use
    fn used_percent(&mut self, path: &Path) -> Option<u8>;
}

pub trait ThermalSensor: Send {
    fn read_celsius(&mut self) -> Option<f32>;
}

// =============================================================================
// sysinfo-backed probes
// =============================================================================

pub struct SysinfoDiskProbe {
    disks: Disks,
}

impl SysinfoDiskProbe {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoDiskProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskProbe for SysinfoDiskProbe {
    fn used_percent(&mut self, path: &Path) -> Option<u8> {
        self.disks.refresh_list();
        let path = path.canonicalize().ok()?;

        // Longest mount point containing the path wins
        let disk = self
            .disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())?;

        used_percent_of(disk.total_space(), disk.available_space())
    }
}

pub(crate) fn used_percent_of(total: u64, available: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(((used as u128 * 100) / total as u128).min(100) as u8)
}

pub struct SysinfoThermalSensor {
    components: Components,
}

impl SysinfoThermalSensor {
    pub fn new() -> Self {
        let components = Components::new_with_refreshed_list();
        if components.list().is_empty() {
            log::warn!("No temperature sensors found, thermal throttling disabled");
        }
        Self { components }
    }
}

impl Default for SysinfoThermalSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalSensor for SysinfoThermalSensor {
    // Hottest sensor reading
    fn read_celsius(&mut self) -> Option<f32> {
        self.components.refresh();
        self.components
            .list()
            .iter()
            .map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .reduce(f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_percent_of() {
        assert_eq!(used_percent_of(0, 0), None);
        assert_eq!(used_percent_of(1000, 1000), Some(0));
        assert_eq!(used_percent_of(1000, 300), Some(70));
        assert_eq!(used_percent_of(1000, 0), Some(100));
        assert_eq!(used_percent_of(u64::MAX, 0), Some(100));
        // Available larger than total never underflows
        assert_eq!(used_percent_of(100, 200), Some(0));
    }
}
