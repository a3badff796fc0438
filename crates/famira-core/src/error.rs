use thiserror::Error;

/// Errors surfaced to callers of the core.
///
/// Everything else in the emulator recovers locally: out-of-range bank
/// indices clamp, undefined reads return the open-bus latch, and unknown
/// mapper ids fall back to NROM with a logged warning.
#[derive(Debug, Error)]
pub enum Error {
    /// Provided buffer is shorter than the 16-byte iNES header.
    #[error("header expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Magic number ("NES\x1A") is missing.
    #[error("missing NES magic bytes")]
    InvalidMagic,

    /// A ROM section (trainer/PRG/CHR) is shorter than the header advertises.
    #[error("{section} section expected {expected} bytes, got {actual}")]
    SectionTooShort {
        section: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No cartridge is inserted for an operation that requires one.
    #[error("no cartridge loaded")]
    NoCartridge,

    /// A save-state blob could not be decoded.
    #[error("malformed save state: {0}")]
    MalformedState(#[from] postcard::Error),

    /// A save-state blob was produced by an incompatible core version.
    #[error("unsupported save-state version {0}")]
    UnsupportedStateVersion(u32),

    /// Wrapper for I/O errors raised while reading ROMs from disk.
    #[error("i/o error while reading cartridge: {0}")]
    Io(#[from] std::io::Error),
}
