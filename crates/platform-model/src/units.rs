//! Resource units and quantity normalization.
//!
//! The API layer stores CPU and memory as a `(number, unit)` pair. The
//! cluster wants a quantity string: millicores get an `m` suffix, cores are
//! a bare number, mebibytes get `Mi` and gibibytes get `Gi`.

use crate::error::ModelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CPU unit tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CpuUnit {
    Millicores,
    Cores,
}

/// Memory / storage unit tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemoryUnit {
    Mebibyte,
    Gibibyte,
}

/// Converts a CPU `(value, unit)` pair into a cluster quantity string.
///
/// Millicores must be whole numbers; cores may be fractional.
pub fn cpu_quantity(field: &str, value: f64, unit: CpuUnit) -> Result<String, ModelError> {
    check_positive(field, value)?;
    match unit {
        CpuUnit::Millicores => {
            check_whole(field, value, "millicores")?;
            Ok(format!("{}m", format_number(value)))
        }
        CpuUnit::Cores => Ok(format_number(value)),
    }
}

/// Converts a memory `(value, unit)` pair into a cluster quantity string.
///
/// Mebibytes must be whole numbers; gibibytes may be fractional.
pub fn memory_quantity(field: &str, value: f64, unit: MemoryUnit) -> Result<String, ModelError> {
    check_positive(field, value)?;
    match unit {
        MemoryUnit::Mebibyte => {
            check_whole(field, value, "mebibytes")?;
            Ok(format!("{}Mi", format_number(value)))
        }
        MemoryUnit::Gibibyte => Ok(format!("{}Gi", format_number(value))),
    }
}

/// CPU value expressed in millicores, for comparisons.
pub fn cpu_millicores(value: f64, unit: CpuUnit) -> f64 {
    match unit {
        CpuUnit::Millicores => value,
        CpuUnit::Cores => value * 1000.0,
    }
}

/// Memory value expressed in mebibytes, for comparisons.
pub fn memory_mebibytes(value: f64, unit: MemoryUnit) -> f64 {
    match unit {
        MemoryUnit::Mebibyte => value,
        MemoryUnit::Gibibyte => value * 1024.0,
    }
}

fn check_positive(field: &str, value: f64) -> Result<(), ModelError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ModelError::invalid(field, format!("{} is not a positive number", value)));
    }
    Ok(())
}

fn check_whole(field: &str, value: f64, unit: &str) -> Result<(), ModelError> {
    if value.fract() != 0.0 {
        return Err(ModelError::invalid(field, format!("{} {} is not a whole number", value, unit)));
    }
    Ok(())
}

/// Formats without a trailing `.0` so `2.0` cores becomes `"2"`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
