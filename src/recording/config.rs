/**
 * ============================================================================
 * RECORDING CONFIG MODULE
 * ============================================================================
 * 
 * PURPOSE: Persistence for recorder configuration and ring-buffer state
 * 
 * FUNCTIONALITY:
 * - Load/save RecorderConfig (defaults when no file exists)
 * - Load/save PersistedState (cfg.json in the records directory)
 * - Atomic writes: temp file + rename, so a crash never leaves a torn file
 * 
 * ============================================================================
 */

use crate::error::{RecorderError, Result};
use crate::recording::types::{PersistedState, RecorderConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

// Load recorder configuration; a missing file yields defaults
pub fn load_config(path: &Path) -> Result<RecorderConfig> {
    if !path.exists() {
        log::info!("No recorder config found at {:?}, using defaults", path);
        return Ok(RecorderConfig::default());
    }

    let config: RecorderConfig = read_json(path)?;
    config.validate().map_err(RecorderError::InvalidConfig)?;

    log::info!("Loaded recorder config from {:?}", path);
    Ok(config)
}

// Save recorder configuration
pub fn save_config(path: &Path, config: &RecorderConfig) -> Result<()> {
    config.validate().map_err(RecorderError::InvalidConfig)?;
    write_json_atomic(path, config)?;
    log::info!("Saved recorder config to {:?}", path);
    Ok(())
}

// Load ring-buffer state; a missing file means a fresh device
pub fn load_state(path: &Path) -> Result<PersistedState> {
    if !path.exists() {
        log::info!("No recorder state at {:?}, starting from index 0", path);
        return Ok(PersistedState::default());
    }

    let mut state: PersistedState = read_json(path)?;
    let raw_rotation = state.rotation;
    if state.normalize_rotation() {
        log::warn!(
            "Invalid rotation {} in {:?}, using {}",
            raw_rotation,
            path,
            state.rotation
        );
    }
    log::info!(
        "Loaded recorder state: index {}, max files {}, loops {}, rotation {}",
        state.current_index,
        state.max_files,
        state.wrap_count,
        state.rotation
    );
    Ok(state)
}

// Save ring-buffer state
pub fn save_state(path: &Path, state: &PersistedState) -> Result<()> {
    write_json_atomic(path, state)?;
    log::debug!("Saved recorder state to {:?}", path);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let contents = serde_json::to_string_pretty(value)?;

    // Write to temporary file, then atomic rename
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;

    Ok(())
}
