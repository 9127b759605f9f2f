use thiserror::Error;

pub type Result<T> = std::result::Result<T, TlbError>;

/// Rejected [`crate::TlbConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("a tlb needs at least one lookup port")]
    NoPorts,

    #[error("{array} array has zero ways")]
    ZeroWays { array: &'static str },

    #[error("{array} array has {ways} ways (at most 65535 supported)")]
    TooManyWays { array: &'static str, ways: usize },

    #[error("normal array set count {sets} is not a power of two")]
    SetCount { sets: usize },

    #[error("{array} array: plru needs a power-of-two way count up to 64 (got {ways})")]
    PlruWays { array: &'static str, ways: usize },

    #[error("paddr_bits must be within 12..=56 (got {0})")]
    PhysAddrBits(u8),
}

/// Caller contract violations detected by [`crate::Tlb::tick`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlbError {
    #[error("tick input carries {got} `{field}` slots but the tlb has {expected} ports")]
    PortCountMismatch {
        field: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("port {port} does not exist (tlb has {ports} ports)")]
    NoSuchPort { port: usize, ports: usize },
}
