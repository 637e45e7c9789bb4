//! Device configuration: `serde` + `serde_yaml` scoped to the
//! parameters spec.md leaves to the integrator — memory sizes, worker
//! count, and ring capacities.

use crate::core::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rasterizer inner-loop backend (spec.md §9 "Design notes").
/// Only `Interpreted` is implemented; the other variants exist so the
/// config schema is forward-compatible with the specialisation strategies
/// spec.md allows but does not mandate. See DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterBackend {
    Interpreted,
    CompileTimeSpecialized,
    RuntimeGenerated,
}

impl Default for RasterBackend {
    fn default() -> Self {
        RasterBackend::Interpreted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Framebuffer memory size in bytes. Must be a power of two (spec.md
    /// §3 says 2 or 4 MiB, but any power-of-two size is honoured).
    pub framebuffer_bytes: usize,
    /// Texture memory size in bytes. Must be a power of two.
    pub texture_bytes: usize,
    /// 1 or 2 render workers (spec.md §4.6 and §5).
    pub worker_count: u8,
    /// Command FIFO capacity in entries. Must be a power of two (spec.md
    /// §3 default is 64 Ki entries).
    pub fifo_capacity: usize,
    /// Parameter ring capacity in entries (spec.md §3 default is 1024).
    pub param_ring_capacity: usize,
    pub raster_backend: RasterBackend,
    /// Optional path to dump texture RAM to on shutdown.
    pub texture_dump_path: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            framebuffer_bytes: 2 * 1024 * 1024,
            texture_bytes: 2 * 1024 * 1024,
            worker_count: 2,
            fifo_capacity: 65536,
            param_ring_capacity: 1024,
            raster_backend: RasterBackend::Interpreted,
            texture_dump_path: None,
        }
    }
}

impl DeviceConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::InvalidConfig(format!("cannot read {:?}: {e}", path.as_ref())))?;
        let config: DeviceConfig = serde_yaml::from_str(&text)
            .map_err(|e| CoreError::InvalidConfig(format!("cannot parse YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.framebuffer_bytes.is_power_of_two() {
            return Err(CoreError::InvalidConfig("framebuffer_bytes must be a power of two".into()));
        }
        if !self.texture_bytes.is_power_of_two() {
            return Err(CoreError::InvalidConfig("texture_bytes must be a power of two".into()));
        }
        if self.worker_count == 0 || self.worker_count > 2 {
            return Err(CoreError::InvalidConfig("worker_count must be 1 or 2".into()));
        }
        if !self.fifo_capacity.is_power_of_two() {
            return Err(CoreError::InvalidConfig("fifo_capacity must be a power of two".into()));
        }
        if self.param_ring_capacity == 0 {
            return Err(CoreError::InvalidConfig("param_ring_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_memory() {
        let mut cfg = DeviceConfig::default();
        cfg.framebuffer_bytes = 3 * 1024 * 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_worker_count() {
        let mut cfg = DeviceConfig::default();
        cfg.worker_count = 3;
        assert!(cfg.validate().is_err());
    }
}
