/**
 * ============================================================================
 * THERMAL GOVERNOR
 * ============================================================================
 * 
 * PURPOSE: Hysteresis between normal and throttled capture
 * 
 * RULES:
 * - Normal -> Throttled when temperature >= high
 * - Throttled -> Normal when temperature <= normal
 * - Anything between normal and high keeps the current mode
 * - A missing reading keeps the current mode
 * 
 * ============================================================================
 */

use crate::recording::types::ThermalMode;

#[derive(Debug, Clone)]
pub struct ThermalGovernor {
    mode: ThermalMode,
    high: f32,
    normal: f32,
}

impl ThermalGovernor {
    pub fn new(high: f32, normal: f32) -> Self {
        Self {
            mode: ThermalMode::Normal,
            high,
            normal,
        }
    }

    pub fn mode(&self) -> ThermalMode {
        self.mode
    }

    // Apply one reading; returns the new mode on a transition
    pub fn update(&mut self, celsius: Option<f32>) -> Option<ThermalMode> {
        let t = celsius?;
        let next = match self.mode {
            ThermalMode::Normal if t >= self.high => ThermalMode::Throttled,
            ThermalMode::Throttled if t <= self.normal => ThermalMode::Normal,
            current => current,
        };

        if next == self.mode {
            return None;
        }
        self.mode = next;
        Some(next)
    }
}
