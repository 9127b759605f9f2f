//! Construction-time TLB configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::replacement::ReplacementKind;

/// Organisation of the normal-page array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalShape {
    SetAssociative { sets: usize, ways: usize },
    FullyAssociative { ways: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalArrayConfig {
    pub shape: NormalShape,
    #[serde(default)]
    pub replacement: ReplacementKind,
}

/// The super-page array is always fully associative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperArrayConfig {
    pub ways: usize,
    #[serde(default)]
    pub replacement: ReplacementKind,
}

/// Miss-handling discipline of a lookup port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortMode {
    /// Fixed one-tick latency; misses are reported and the requester retries.
    NonBlocking,
    /// Holds its response until the walker resolves the miss.
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub normal: NormalArrayConfig,
    pub super_page: SuperArrayConfig,
    pub ports: Vec<PortMode>,
    /// Move entries evicted from the normal array into the super-page array.
    #[serde(default)]
    pub normal_as_victim: bool,
    #[serde(default = "default_paddr_bits")]
    pub paddr_bits: u8,
    /// Seed for the `random` replacement policy.
    #[serde(default = "default_random_seed")]
    pub random_seed: u16,
}

fn default_name() -> String {
    "tlb".to_string()
}

fn default_paddr_bits() -> u8 {
    36
}

fn default_random_seed() -> u16 {
    1
}

impl TlbConfig {
    /// Instruction-side defaults: two blocking fetch ports over a small fully-associative
    /// normal array.
    pub fn itlb_defaults() -> Self {
        Self {
            name: "itlb".to_string(),
            normal: NormalArrayConfig {
                shape: NormalShape::FullyAssociative { ways: 32 },
                replacement: ReplacementKind::Plru,
            },
            super_page: SuperArrayConfig {
                ways: 4,
                replacement: ReplacementKind::Plru,
            },
            ports: vec![PortMode::Blocking, PortMode::Blocking],
            normal_as_victim: false,
            paddr_bits: default_paddr_bits(),
            random_seed: default_random_seed(),
        }
    }

    /// Data-side defaults: two load ports and one store port, non-blocking, with normal
    /// victims recycled into the super-page array.
    pub fn dtlb_defaults() -> Self {
        Self {
            name: "dtlb".to_string(),
            normal: NormalArrayConfig {
                shape: NormalShape::SetAssociative { sets: 64, ways: 2 },
                replacement: ReplacementKind::Plru,
            },
            super_page: SuperArrayConfig {
                ways: 16,
                replacement: ReplacementKind::Plru,
            },
            ports: vec![PortMode::NonBlocking; 3],
            normal_as_victim: true,
            paddr_bits: default_paddr_bits(),
            random_seed: default_random_seed(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if !(12..=56).contains(&self.paddr_bits) {
            return Err(ConfigError::PhysAddrBits(self.paddr_bits));
        }

        let (sets, ways) = match self.normal.shape {
            NormalShape::SetAssociative { sets, ways } => (sets, ways),
            NormalShape::FullyAssociative { ways } => (1, ways),
        };
        if !sets.is_power_of_two() {
            return Err(ConfigError::SetCount { sets });
        }
        validate_ways("normal", ways, self.normal.replacement)?;
        validate_ways("super-page", self.super_page.ways, self.super_page.replacement)?;
        Ok(())
    }
}

fn validate_ways(
    array: &'static str,
    ways: usize,
    replacement: ReplacementKind,
) -> Result<(), ConfigError> {
    if ways == 0 {
        return Err(ConfigError::ZeroWays { array });
    }
    if ways > u16::MAX as usize {
        return Err(ConfigError::TooManyWays { array, ways });
    }
    if replacement == ReplacementKind::Plru && ways > 1 && (!ways.is_power_of_two() || ways > 64)
    {
        return Err(ConfigError::PlruWays { array, ways });
    }
    Ok(())
}
