use std::collections::HashMap;

use crate::models::RegisterDescriptor;
use crate::obis_utils::ObisCode;

/// Maps a register identifier to its semantic type and scaling
pub trait RegisterCatalog: Send + Sync {
    fn lookup(&self, obis: &ObisCode) -> Option<RegisterDescriptor>;
}

/// Catalog built once from configuration, read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    registers: HashMap<ObisCode, RegisterDescriptor>,
}

impl StaticCatalog {
    pub fn new(descriptors: Vec<RegisterDescriptor>) -> Self {
        let registers = descriptors.into_iter().map(|d| (d.obis, d)).collect();
        StaticCatalog { registers }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl RegisterCatalog for StaticCatalog {
    fn lookup(&self, obis: &ObisCode) -> Option<RegisterDescriptor> {
        self.registers.get(obis).copied()
    }
}

/// Physical value of a raw register reading; `None` when the result is not
/// a finite number
pub fn scale_value(raw: f64, descriptor: &RegisterDescriptor) -> Option<f64> {
    let value = raw * descriptor.scaling;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}
