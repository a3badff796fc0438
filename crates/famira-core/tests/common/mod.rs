//! Shared helpers: synthetic iNES images and test logging.
#![allow(dead_code)]

use ctor::ctor;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[ctor]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub const PRG_BANK: usize = 16 * 1024;
pub const CHR_BANK: usize = 8 * 1024;

/// Builds an iNES image with `program` at `$8000`, all vectors pointing
/// into PRG, and optional CHR content.
pub struct RomBuilder {
    mapper: u8,
    prg_banks: u8,
    chr: Vec<u8>,
    program: Vec<u8>,
    nmi_vector: u16,
    irq_vector: u16,
    prg_fill: u8,
}

impl RomBuilder {
    pub fn new(program: &[u8]) -> Self {
        Self {
            mapper: 0,
            prg_banks: 2,
            chr: vec![0; CHR_BANK],
            program: program.to_vec(),
            nmi_vector: 0x8000,
            irq_vector: 0x8000,
            prg_fill: 0,
        }
    }

    pub fn mapper(mut self, mapper: u8) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn nmi_vector(mut self, addr: u16) -> Self {
        self.nmi_vector = addr;
        self
    }

    pub fn irq_vector(mut self, addr: u16) -> Self {
        self.irq_vector = addr;
        self
    }

    /// Fills the unused PRG space with a constant (DMC sample tests).
    pub fn prg_fill(mut self, value: u8) -> Self {
        self.prg_fill = value;
        self
    }

    /// Writes extra bytes at a PRG offset (e.g. handlers above the main
    /// program).
    pub fn patch_prg(mut self, offset: usize, bytes: &[u8]) -> Self {
        if self.program.len() < offset + bytes.len() {
            self.program.resize(offset + bytes.len(), self.prg_fill);
        }
        self.program[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Replaces CHR bank 0 contents.
    pub fn chr(mut self, chr: &[u8]) -> Self {
        self.chr = chr.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let prg_len = self.prg_banks as usize * PRG_BANK;
        let mut prg = vec![self.prg_fill; prg_len];
        prg[..self.program.len()].copy_from_slice(&self.program);

        // Vectors live at the top of the address space.
        let vectors = prg_len - 6;
        prg[vectors..vectors + 2].copy_from_slice(&self.nmi_vector.to_le_bytes());
        prg[vectors + 2..vectors + 4].copy_from_slice(&0x8000u16.to_le_bytes());
        prg[vectors + 4..vectors + 6].copy_from_slice(&self.irq_vector.to_le_bytes());

        let chr_banks = (self.chr.len() / CHR_BANK) as u8;
        let mut rom = vec![
            b'N',
            b'E',
            b'S',
            0x1A,
            self.prg_banks,
            chr_banks,
            (self.mapper & 0x0F) << 4,
            self.mapper & 0xF0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
        ];
        rom.extend_from_slice(&prg);
        rom.extend_from_slice(&self.chr);
        rom
    }
}

/// CHR bank with tile 1 solid (color 1) and every other tile empty.
pub fn chr_with_solid_tile1() -> Vec<u8> {
    let mut chr = vec![0u8; CHR_BANK];
    chr[16..24].fill(0xFF);
    chr
}
