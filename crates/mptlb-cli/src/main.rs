#![forbid(unsafe_code)]

// Native-only trace runner. Keep a wasm32 stub `main` so `--workspace` wasm builds still link.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod pmp;
#[cfg(not(target_arch = "wasm32"))]
mod trace;
#[cfg(not(target_arch = "wasm32"))]
mod walker;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs::File;
    use std::io::{self, BufReader, BufWriter, Write};
    use std::path::{Path, PathBuf};

    use anyhow::{Context, Result};
    use clap::{Parser, ValueEnum};
    use mptlb::{Tlb, TlbConfig, TickOutput, TlbStats};
    use serde::Serialize;
    use tracing::info;
    use tracing_subscriber::EnvFilter;

    use crate::pmp::RegionPmp;
    use crate::trace::Trace;
    use crate::walker::Walker;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
    enum Preset {
        Itlb,
        Dtlb,
    }

    #[derive(Debug, Parser)]
    #[command(about = "Replays a lookup trace against the multi-port TLB model")]
    pub struct Args {
        /// Trace file (JSON) with CSR state, mappings, PMP regions and per-tick requests.
        #[arg(long)]
        trace: PathBuf,

        /// TLB configuration (JSON). Overrides `--preset`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Built-in TLB configuration used when no `--config` is given.
        #[arg(long, value_enum, default_value_t = Preset::Dtlb)]
        preset: Preset,

        /// Ticks between a walker request being accepted and its response.
        #[arg(long, default_value_t = 4)]
        walker_latency: u64,

        /// Walks the walker keeps in flight before deasserting ready.
        #[arg(long, default_value_t = 4)]
        walker_depth: usize,

        /// Where to write per-tick records (`stdout` or a file path).
        #[arg(long, default_value = "stdout")]
        out: String,

        /// Log filter (`tracing_subscriber::EnvFilter` syntax).
        #[arg(long, env = "MPTLB_LOG", default_value = "warn")]
        log_level: String,
    }

    #[derive(Serialize)]
    struct TickRecord<'a> {
        tick: u64,
        /// VPN of the walker response presented this tick.
        refill: Option<u64>,
        #[serde(flatten)]
        out: &'a TickOutput,
    }

    #[derive(Serialize)]
    struct Summary {
        ticks: u64,
        pmp_checks: u64,
        /// Walks still pending in the walker model when the trace ended.
        walks_in_flight: usize,
        stats: Option<TlbStats>,
    }

    pub fn main() -> Result<()> {
        let args = Args::parse();

        let filter = EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid log filter: {}", args.log_level))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();

        let config = match &args.config {
            Some(path) => load_config(path)?,
            None => match args.preset {
                Preset::Itlb => TlbConfig::itlb_defaults(),
                Preset::Dtlb => TlbConfig::dtlb_defaults(),
            },
        };
        let ports = config.ports.len();
        let name = config.name.clone();
        let mut tlb = Tlb::new(config).context("invalid tlb config")?;

        let trace = Trace::load(&args.trace)?;
        trace.check_ports(ports)?;
        info!(tlb = %name, ports, ticks = trace.ticks.len(), "replaying trace");

        let mut out = open_output(&args.out)?;
        let mut pmp = RegionPmp::new(trace.pmp.clone());
        let mut walker = Walker::new(&trace.mappings, args.walker_latency, args.walker_depth);
        let mut csr = trace.csr;

        for tick in &trace.ticks {
            if let Some(next) = tick.csr {
                csr = next;
            }
            let now = tlb.now();
            let mut input = tick.input(ports, csr, walker.ready());
            if tick.flush.is_some() {
                walker.cancel_all();
            }
            input.ptw_response = walker.respond(now);

            let output = tlb
                .tick(&input, &mut pmp)
                .with_context(|| format!("tick {now}"))?;
            for (req, &ready) in output.ptw_requests.iter().zip(&input.ptw_ready) {
                if let (Some(req), true) = (req, ready) {
                    walker.accept(now, *req);
                }
            }

            let record = TickRecord {
                tick: now,
                refill: input.ptw_response.map(|r| r.entry.vpn()),
                out: &output,
            };
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }

        let summary = Summary {
            ticks: tlb.now(),
            pmp_checks: pmp.checks(),
            walks_in_flight: walker.in_flight(),
            stats: tlb.stats(),
        };
        serde_json::to_writer(&mut out, &summary)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    fn load_config(path: &Path) -> Result<TlbConfig> {
        let file = File::open(path)
            .with_context(|| format!("failed to open config: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    fn open_output(target: &str) -> Result<Box<dyn Write>> {
        if target == "stdout" {
            return Ok(Box::new(BufWriter::new(io::stdout())));
        }
        let file = File::create(target).with_context(|| format!("failed to create {target}"))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
