//! Mapper capability contract and board registry.
//!
//! Boards sit between the CPU/PPU and the cartridge memories. The CPU and
//! PPU never know which board is installed; they talk through [`Mapper`]
//! and consult [`Capabilities`] for the optional surfaces (scanline IRQ,
//! nametable override, per-tile attributes, CHR latches).

use std::borrow::Cow;
use std::fmt::Debug;

use dyn_clone::DynClone;
use tracing::warn;

use crate::cartridge::header::{Header, Mirroring};
use crate::reset_kind::ResetKind;

pub mod banks;

mod mapper0;
mod mapper1;
mod mapper2;
mod mapper3;
mod mapper4;
mod mapper5;
mod mapper7;
mod mapper9;
mod mapper11;
mod mapper25;
mod mapper34;
mod mapper66;
mod mapper69;
mod mapper79;

pub use mapper0::Nrom;
pub use mapper1::Mmc1;
pub use mapper2::Uxrom;
pub use mapper3::Cnrom;
pub use mapper4::{Mmc3, Mmc3Variant};
pub use mapper5::Mmc5;
pub use mapper7::Axrom;
pub use mapper9::{ChrLatchBoard, ChrLatchVariant};
pub use mapper11::ColorDreams;
pub use mapper25::Vrc4;
pub use mapper34::Bnrom;
pub use mapper66::Gxrom;
pub use mapper69::Fme7;
pub use mapper79::Nina03;

pub use self::state::MapperState;

/// Optional surfaces a board declares at construction.
///
/// The PPU only calls an optional method when the matching flag is set, so
/// boards without a capability never pay for the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Board wants `clock_scanline` on filtered A12 rising edges.
    pub scanline_irq: bool,
    /// Board may supply nametable bytes via `read_nametable`.
    pub nametable_override: bool,
    /// Board supplies per-tile attributes via `extended_attribute`.
    pub per_tile_attributes: bool,
    /// Board flips CHR latches inside `ppu_read` on magic fetch addresses.
    pub chr_latch: bool,
    /// Board wants `cpu_clock` once per CPU cycle batch.
    pub cpu_clock_hook: bool,
    /// Board wants `end_scanline` at dot 4 of every rendered scanline.
    pub end_scanline_hook: bool,
    /// Board observes CPU writes to the PPU registers.
    pub ppu_register_hook: bool,
    /// Board contributes expansion audio to the mixer.
    pub expansion_audio: bool,
}

/// What kind of PPU fetch is hitting pattern space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpuFetchKind {
    /// Background tile pattern fetch from the rendering pipeline.
    Background,
    /// Sprite pattern fetch (dots 257-320).
    Sprite,
    /// CPU-driven access through `$2007`.
    Data,
}

/// Who is asking for a nametable byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NametableKind {
    /// Background tile index fetch.
    Tile,
    /// Background attribute fetch.
    Attribute,
    /// CPU access through `$2007`.
    Cpu,
}

/// Contract implemented by every board.
///
/// `cpu_read`/`ppu_read` return `None` to decline an address, in which case
/// the bus substitutes open-bus (CPU side) or internal VRAM (PPU side).
/// `ppu_write` returns `true` when the board consumed the write.
pub trait Mapper: DynClone + Debug {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn reset(&mut self, kind: ResetKind);

    fn cpu_read(&mut self, addr: u16) -> Option<u8>;

    /// `instr` is the console instruction counter, used by boards that must
    /// ignore repeat writes from the same read-modify-write instruction.
    fn cpu_write(&mut self, addr: u16, data: u8, instr: u64);

    fn ppu_read(&mut self, addr: u16, kind: PpuFetchKind) -> Option<u8>;

    fn ppu_write(&mut self, addr: u16, data: u8) -> bool;

    fn mirroring(&self) -> Mirroring;

    fn irq_pending(&self) -> bool {
        false
    }

    /// Filtered A12 rising edge during rendering (requires `scanline_irq`).
    fn clock_scanline(&mut self) {}

    /// CPU-cycle hook (requires `cpu_clock_hook`).
    fn cpu_clock(&mut self, _cycles: u32) {}

    /// Called at dot 4 of each rendered scanline (requires
    /// `end_scanline_hook`); early enough to update nametables before the
    /// next background fetch.
    fn end_scanline(&mut self, _line: u16) {}

    /// Observes CPU writes to `$2000-$2007` (requires `ppu_register_hook`).
    fn ppu_register_write(&mut self, _addr: u16, _data: u8) {}

    /// Nametable fetch override (requires `nametable_override`).
    fn read_nametable(&mut self, _addr: u16, _kind: NametableKind) -> Option<u8> {
        None
    }

    /// Nametable write override; `true` when consumed.
    fn write_nametable(&mut self, _addr: u16, _data: u8) -> bool {
        false
    }

    /// Per-tile attribute bits (requires `per_tile_attributes`).
    fn extended_attribute(&self, _coarse_x: u8, _coarse_y: u8) -> Option<u8> {
        None
    }

    /// Advances expansion audio by one CPU cycle.
    fn clock_audio(&mut self) {}

    /// Current expansion audio sample in linear amplitude space.
    fn audio_sample(&self) -> f32 {
        0.0
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        None
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    /// Battery-backed portion of work RAM, for host persistence.
    fn prg_save_ram(&self) -> Option<&[u8]> {
        None
    }

    fn prg_save_ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn chr_ram(&self) -> Option<&[u8]> {
        None
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn mapper_id(&self) -> u16;

    fn name(&self) -> Cow<'static, str>;

    fn save_state(&self) -> MapperState;

    fn load_state(&mut self, state: &MapperState);
}

dyn_clone::clone_trait_object!(Mapper);

/// Instantiates the board for `header.mapper`.
///
/// Unknown ids fall back to NROM so the core stays runnable; the surprise is
/// logged once per load.
pub fn create_mapper(
    header: &Header,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    trainer: Option<&[u8]>,
) -> Box<dyn Mapper> {
    match header.mapper {
        0 => Box::new(Nrom::new(header, prg_rom, chr_rom, trainer)),
        1 => Box::new(Mmc1::new(header, prg_rom, chr_rom, trainer)),
        2 => Box::new(Uxrom::new(header, prg_rom, chr_rom, trainer)),
        3 => Box::new(Cnrom::new(header, prg_rom, chr_rom, trainer)),
        4 => Box::new(Mmc3::new(header, prg_rom, chr_rom, trainer, Mmc3Variant::Mmc3)),
        5 => Box::new(Mmc5::new(header, prg_rom, chr_rom, trainer)),
        6 => Box::new(Mmc3::new(header, prg_rom, chr_rom, trainer, Mmc3Variant::Mmc6)),
        7 => Box::new(Axrom::new(header, prg_rom, chr_rom, trainer)),
        9 => Box::new(ChrLatchBoard::new(
            header,
            prg_rom,
            chr_rom,
            trainer,
            ChrLatchVariant::Mmc2,
        )),
        10 => Box::new(ChrLatchBoard::new(
            header,
            prg_rom,
            chr_rom,
            trainer,
            ChrLatchVariant::Mmc4,
        )),
        11 => Box::new(ColorDreams::new(header, prg_rom, chr_rom, trainer)),
        25 => Box::new(Vrc4::new(header, prg_rom, chr_rom, trainer)),
        34 => Box::new(Bnrom::new(header, prg_rom, chr_rom, trainer)),
        66 => Box::new(Gxrom::new(header, prg_rom, chr_rom, trainer)),
        69 => Box::new(Fme7::new(header, prg_rom, chr_rom, trainer)),
        79 => Box::new(Nina03::new(header, prg_rom, chr_rom, trainer)),
        206 => Box::new(Mmc3::new(header, prg_rom, chr_rom, trainer, Mmc3Variant::Dxrom)),
        id => {
            warn!(mapper = id, "unknown mapper id, falling back to NROM");
            Box::new(Nrom::new(header, prg_rom, chr_rom, trainer))
        }
    }
}

mod state {
    //! Per-board serializable state, aggregated into one enum so the
    //! console snapshot stays a closed type.

    use serde::{Deserialize, Serialize};

    pub use super::mapper1::Mmc1State;
    pub use super::mapper4::Mmc3State;
    pub use super::mapper5::Mmc5State;
    pub use super::mapper9::ChrLatchState;
    pub use super::mapper25::Vrc4State;
    pub use super::mapper69::Fme7State;

    /// Board registers captured by a save state. ROM contents are never
    /// serialized; RAM buffers ride along at the cartridge level.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum MapperState {
        Nrom,
        Mmc1(Mmc1State),
        /// Single bank-select register boards (UxROM, CNROM, AxROM, Color
        /// Dreams, GxROM, NINA-03/06).
        SingleRegister {
            reg: u8,
        },
        /// Mapper 34 boards: one 32 KiB PRG bank plus the NINA-001 CHR
        /// pair.
        Nina001 {
            prg_bank: u8,
            chr_banks: [u8; 2],
        },
        Mmc3(Mmc3State),
        Mmc5(Box<Mmc5State>),
        ChrLatch(ChrLatchState),
        Vrc4(Vrc4State),
        Fme7(Fme7State),
    }
}
