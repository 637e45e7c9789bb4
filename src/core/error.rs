//! Ambient error surface for the host-facing edges of the core.
//!
//! Per spec.md §7 the rasterizer itself never fails: every register
//! encoding and every memory address has defined behaviour (silent
//! ignore, address-masking, or blocking). `CoreError` only covers the two
//! places spec.md §7 explicitly calls out as a caller mistake: a
//! malformed `DeviceConfig` and the one "programming oversight"
//! condition (a comparator/select field fed a value outside its
//! documented range).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A `DeviceConfig` field was out of range (e.g. a non-power-of-two
    /// memory size or FIFO capacity).
    InvalidConfig(String),
    /// A mode-register field was decoded to a value the pipeline has no
    /// defined behaviour for. Spec.md §7 calls this a "programming
    /// oversight" and says implementations should abort rather than
    /// silently produce garbage.
    ProgrammingOversight(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidConfig(msg) => write!(f, "invalid device configuration: {msg}"),
            CoreError::ProgrammingOversight(msg) => write!(f, "programming oversight: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;
