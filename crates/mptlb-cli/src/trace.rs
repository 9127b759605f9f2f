//! Trace files: initial CSR state, the walker's page table, PMP regions and the per-tick
//! stimulus.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use mptlb::{CsrState, FlushScope, LookupRequest, TickInput};
use serde::Deserialize;

use crate::pmp::PmpRegion;
use crate::walker::Mapping;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    #[serde(default)]
    pub csr: CsrState,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub pmp: Vec<PmpRegion>,
    pub ticks: Vec<TraceTick>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceTick {
    /// Per-port requests; missing trailing ports are idle.
    #[serde(default)]
    pub requests: Vec<Option<LookupRequest>>,
    #[serde(default)]
    pub flush: Option<FlushScope>,
    /// New CSR state, kept for later ticks.
    #[serde(default)]
    pub csr: Option<CsrState>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open trace: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse trace: {}", path.display()))
    }

    /// Rejects ticks that address ports the TLB does not have.
    pub fn check_ports(&self, ports: usize) -> Result<()> {
        for (i, tick) in self.ticks.iter().enumerate() {
            if tick.requests.len() > ports {
                bail!(
                    "trace tick {i} drives {} ports but the tlb has {ports}",
                    tick.requests.len()
                );
            }
        }
        Ok(())
    }
}

impl TraceTick {
    /// Builds the TLB input under `csr`, with the walker's channel readiness on every port.
    pub fn input(&self, ports: usize, csr: CsrState, ptw_ready: bool) -> TickInput {
        let mut input = TickInput::idle(ports, csr);
        input.ptw_ready = vec![ptw_ready; ports];
        for (port, req) in self.requests.iter().enumerate() {
            if let Some(req) = *req {
                input = input.with_request(port, req);
            }
        }
        if let Some(scope) = self.flush {
            input = input.with_flush(scope);
        }
        input
    }
}
