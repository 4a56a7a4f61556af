//! The gas cost model: the immutable parameter object defining the cost of
//! every instruction category and the byte-scaled cost of installing and
//! loading contract archives.
//!
//! All costs are unsigned, so the non-negativity invariant holds by
//! construction. The model is read-only during instrumentation and may be
//! shared between workers instrumenting different classes in parallel.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-category cost constants used by the gas metering injector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GasCostModel {
    /// CPU cost of an instruction that falls in no other category.
    pub cpu_instruction: u64,
    /// CPU cost of an arithmetic or logic instruction.
    pub cpu_arithmetic: u64,
    /// CPU cost of an array element access.
    pub cpu_array_access: u64,
    /// CPU cost of a field access.
    pub cpu_field_access: u64,
    /// CPU cost of a method invocation.
    pub cpu_invoke: u64,
    /// CPU cost of a memory allocation instruction.
    pub cpu_allocation: u64,
    /// CPU cost of a comparison, branch or switch instruction.
    pub cpu_select: u64,

    /// RAM cost of an object header.
    pub ram_object: u64,
    /// RAM cost of a single field of an allocated object.
    pub ram_field: u64,
    /// RAM cost of an array header.
    pub ram_array: u64,
    /// RAM cost of a single slot of an allocated array.
    pub ram_array_slot: u64,
    /// RAM cost of an activation record, charged at each invocation.
    pub ram_activation_record: u64,
    /// RAM cost of a single slot of an activation record.
    pub ram_activation_slot: u64,

    /// Bytes of an installed archive that cost one CPU gas unit.
    pub bytes_per_cpu_unit_installed: u64,
    /// Bytes of a loaded archive that cost one CPU gas unit.
    pub bytes_per_cpu_unit_loaded: u64,
    /// Bytes of an installed archive that cost one RAM gas unit.
    pub bytes_per_ram_unit_installed: u64,
}

impl Default for GasCostModel {
    fn default() -> Self {
        Self {
            cpu_instruction: 1,
            cpu_arithmetic: 2,
            cpu_array_access: 2,
            cpu_field_access: 3,
            cpu_invoke: 5,
            cpu_allocation: 10,
            cpu_select: 4,
            ram_object: 8,
            ram_field: 4,
            ram_array: 12,
            ram_array_slot: 4,
            ram_activation_record: 16,
            ram_activation_slot: 4,
            bytes_per_cpu_unit_installed: 400,
            bytes_per_cpu_unit_loaded: 1000,
            bytes_per_ram_unit_installed: 40,
        }
    }
}

impl GasCostModel {
    /// Loads a cost model from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::config_error(format!("invalid gas cost model: {e}")))
    }

    /// CPU cost of installing an archive of the given size.
    pub fn cpu_cost_to_install(&self, bytes: u64) -> u64 {
        bytes / self.bytes_per_cpu_unit_installed.max(1)
    }

    /// CPU cost of loading an already installed archive of the given size.
    pub fn cpu_cost_to_load(&self, bytes: u64) -> u64 {
        bytes / self.bytes_per_cpu_unit_loaded.max(1)
    }

    /// RAM cost of installing an archive of the given size.
    pub fn ram_cost_to_install(&self, bytes: u64) -> u64 {
        bytes / self.bytes_per_ram_unit_installed.max(1)
    }
}
