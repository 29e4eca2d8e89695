use anyhow::bail;

use crate::strategy::StrategySpec;

/// Registry of named strategy variants
///
/// Declaration order is significant: the selector breaks score ties in favor
/// of the earlier registration, so selection stays deterministic.
pub struct StrategyCatalog {
    specs: Vec<StrategySpec>,
}

impl StrategyCatalog {
    pub fn new(specs: Vec<StrategySpec>) -> anyhow::Result<Self> {
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if specs[..i].iter().any(|other| other.name == spec.name) {
                bail!("duplicate strategy name '{}' in catalog", spec.name);
            }
        }

        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[StrategySpec] {
        &self.specs
    }

    /// Enabled strategies in declaration order
    pub fn enabled(&self) -> impl Iterator<Item = &StrategySpec> {
        self.specs.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&StrategySpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
