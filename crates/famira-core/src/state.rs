//! Full-console save states.
//!
//! Per-component state structs aggregate into a [`ConsoleState`], wrapped
//! in a [`Snapshot`] with metadata for compatibility checks, and encoded
//! with `postcard`. ROM contents never serialize; RAM buffers round-trip
//! exactly, so save -> load -> save is byte-identical.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::apu::Apu;
use crate::cartridge::mapper::MapperState;
use crate::controller::ControllerPorts;
use crate::cpu::status::Status as CpuStatus;
use crate::error::Error;
use crate::ppu::registers::{Control, Mask, Status as PpuStatus, VramRegisters};
use crate::Console;

/// Bump when the snapshot layout changes incompatibly.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Metadata stored alongside every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub format_version: u32,
    /// CRC-32 of the cartridge image the state was captured against.
    pub rom_checksum: u32,
    pub mapper: u16,
}

/// Snapshot payload plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub meta: SnapshotMeta,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
    pub pc: u16,
    pub open_bus: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpuState {
    pub control: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub write_toggle: bool,
    pub read_buffer: u8,
    pub io_latch: u8,
    pub vram: Vec<u8>,
    pub palette: Vec<u8>,
    pub oam: Vec<u8>,
    pub secondary_oam: Vec<u8>,
    pub bg_shift_lo: u16,
    pub bg_shift_hi: u16,
    pub at_shift_lo: u16,
    pub at_shift_hi: u16,
    pub nt_latch: u8,
    pub at_latch: u8,
    pub pattern_lo_latch: u8,
    pub pattern_hi_latch: u8,
    pub sprite_pattern_lo: [u8; 8],
    pub sprite_pattern_hi: [u8; 8],
    pub sprite_attr: [u8; 8],
    pub sprite_x: [u8; 8],
    pub sprite_count: u8,
    pub sprite0_in_line: bool,
    pub scanline: u16,
    pub dot: u16,
    pub odd_frame: bool,
    pub frame: u64,
    pub dots_in_frame: u32,
    pub warm_up: bool,
    pub suppress_vblank: bool,
    pub nmi_delay: u8,
    pub nmi_pending: bool,
    pub a12_prev_high: bool,
    pub a12_last_high_dot: u64,
    pub total_dots: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartridgeState {
    pub mapper_id: u16,
    pub prg_ram: Option<Vec<u8>>,
    pub chr_ram: Option<Vec<u8>>,
    pub mapper: MapperState,
}

/// Everything needed to resume emulation deterministically, minus the ROM
/// image itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleState {
    pub cpu: CpuState,
    pub ppu: PpuState,
    pub apu: Apu,
    pub ram: Vec<u8>,
    pub cartridge: CartridgeState,
    pub controllers: ControllerPorts,
    pub instr_count: u64,
    pub cycles: u64,
}

pub type ConsoleSnapshot = Snapshot<ConsoleState>;

impl Console {
    /// Captures and encodes a full snapshot.
    pub fn save_state(&self) -> Result<Vec<u8>, Error> {
        let cart = self.cartridge.as_ref().ok_or(Error::NoCartridge)?;
        let snapshot = Snapshot {
            meta: SnapshotMeta {
                format_version: STATE_FORMAT_VERSION,
                rom_checksum: cart.checksum(),
                mapper: cart.mapper().mapper_id(),
            },
            data: ConsoleState {
                cpu: CpuState {
                    a: self.cpu.a,
                    x: self.cpu.x,
                    y: self.cpu.y,
                    s: self.cpu.s,
                    p: self.cpu.p.bits(),
                    pc: self.cpu.pc,
                    open_bus: self.cpu.open_bus,
                },
                ppu: ppu_to_state(&self.ppu),
                apu: self.apu.clone(),
                ram: self.ram.to_vec(),
                cartridge: CartridgeState {
                    mapper_id: cart.mapper().mapper_id(),
                    prg_ram: cart.mapper().prg_ram().map(<[u8]>::to_vec),
                    chr_ram: cart.mapper().chr_ram().map(<[u8]>::to_vec),
                    mapper: cart.mapper().save_state(),
                },
                controllers: self.controllers,
                instr_count: self.instr_count,
                cycles: self.cycles,
            },
        };
        Ok(postcard::to_stdvec(&snapshot)?)
    }

    /// Decodes and applies a snapshot.
    ///
    /// A checksum mismatch against the inserted cartridge is surprising
    /// but survivable; it warns and proceeds per the error-handling
    /// policy. An unsupported format version is a hard error.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let snapshot: ConsoleSnapshot = postcard::from_bytes(bytes)?;
        if snapshot.meta.format_version != STATE_FORMAT_VERSION {
            return Err(Error::UnsupportedStateVersion(snapshot.meta.format_version));
        }
        let cart = self.cartridge.as_mut().ok_or(Error::NoCartridge)?;
        if snapshot.meta.rom_checksum != cart.checksum() {
            warn!(
                "save state checksum {:08X} does not match cartridge {:08X}, loading anyway",
                snapshot.meta.rom_checksum,
                cart.checksum()
            );
        }

        let state = snapshot.data;

        self.cpu.a = state.cpu.a;
        self.cpu.x = state.cpu.x;
        self.cpu.y = state.cpu.y;
        self.cpu.s = state.cpu.s;
        self.cpu.p = CpuStatus::from_bits_truncate(state.cpu.p);
        self.cpu.pc = state.cpu.pc;
        self.cpu.open_bus = state.cpu.open_bus;

        ppu_apply_state(&mut self.ppu, &state.ppu);

        self.apu = state.apu;
        self.apu
            .configure_rates(self.config.sample_rate, self.config.preferred_frame_rate);

        if state.ram.len() == self.ram.len() {
            self.ram.copy_from_slice(&state.ram);
        }

        cart.mapper_mut().load_state(&state.cartridge.mapper);
        if let (Some(saved), Some(live)) =
            (state.cartridge.prg_ram.as_ref(), cart.mapper_mut().prg_ram_mut())
        {
            if saved.len() == live.len() {
                live.copy_from_slice(saved);
            }
        }
        if let (Some(saved), Some(live)) =
            (state.cartridge.chr_ram.as_ref(), cart.mapper_mut().chr_ram_mut())
        {
            if saved.len() == live.len() {
                live.copy_from_slice(saved);
            }
        }

        self.controllers = state.controllers;
        self.instr_count = state.instr_count;
        self.cycles = state.cycles;
        Ok(())
    }
}

fn ppu_to_state(ppu: &crate::ppu::Ppu) -> PpuState {
    PpuState {
        control: ppu.control.bits(),
        mask: ppu.mask.bits(),
        status: ppu.status.bits(),
        oam_addr: ppu.oam_addr,
        v: ppu.vram_regs.v,
        t: ppu.vram_regs.t,
        fine_x: ppu.vram_regs.x,
        write_toggle: ppu.vram_regs.w,
        read_buffer: ppu.read_buffer,
        io_latch: ppu.io_latch,
        vram: ppu.vram.to_vec(),
        palette: ppu.palette_ram.as_bytes().to_vec(),
        oam: ppu.oam.to_vec(),
        secondary_oam: ppu.secondary_oam.to_vec(),
        bg_shift_lo: ppu.bg_shift_lo,
        bg_shift_hi: ppu.bg_shift_hi,
        at_shift_lo: ppu.at_shift_lo,
        at_shift_hi: ppu.at_shift_hi,
        nt_latch: ppu.nt_latch,
        at_latch: ppu.at_latch,
        pattern_lo_latch: ppu.pattern_lo_latch,
        pattern_hi_latch: ppu.pattern_hi_latch,
        sprite_pattern_lo: ppu.sprite_pattern_lo,
        sprite_pattern_hi: ppu.sprite_pattern_hi,
        sprite_attr: ppu.sprite_attr,
        sprite_x: ppu.sprite_x,
        sprite_count: ppu.sprite_count,
        sprite0_in_line: ppu.sprite0_in_line,
        scanline: ppu.scanline,
        dot: ppu.dot,
        odd_frame: ppu.odd_frame,
        frame: ppu.frame,
        dots_in_frame: ppu.dots_in_frame,
        warm_up: ppu.warm_up,
        suppress_vblank: ppu.suppress_vblank,
        nmi_delay: ppu.nmi_delay,
        nmi_pending: ppu.nmi_pending,
        a12_prev_high: ppu.a12_prev_high,
        a12_last_high_dot: ppu.a12_last_high_dot,
        total_dots: ppu.total_dots,
    }
}

fn ppu_apply_state(ppu: &mut crate::ppu::Ppu, state: &PpuState) {
    ppu.control = Control::from_bits_truncate(state.control);
    ppu.mask = Mask::from_bits_truncate(state.mask);
    ppu.status = PpuStatus::from_bits_truncate(state.status);
    ppu.oam_addr = state.oam_addr;
    ppu.vram_regs = VramRegisters {
        v: state.v,
        t: state.t,
        x: state.fine_x,
        w: state.write_toggle,
    };
    ppu.read_buffer = state.read_buffer;
    ppu.io_latch = state.io_latch;
    if state.vram.len() == ppu.vram.len() {
        ppu.vram.copy_from_slice(&state.vram);
    }
    ppu.palette_ram.load(&state.palette);
    if state.oam.len() == ppu.oam.len() {
        ppu.oam.copy_from_slice(&state.oam);
    }
    if state.secondary_oam.len() == ppu.secondary_oam.len() {
        ppu.secondary_oam.copy_from_slice(&state.secondary_oam);
    }
    ppu.bg_shift_lo = state.bg_shift_lo;
    ppu.bg_shift_hi = state.bg_shift_hi;
    ppu.at_shift_lo = state.at_shift_lo;
    ppu.at_shift_hi = state.at_shift_hi;
    ppu.nt_latch = state.nt_latch;
    ppu.at_latch = state.at_latch;
    ppu.pattern_lo_latch = state.pattern_lo_latch;
    ppu.pattern_hi_latch = state.pattern_hi_latch;
    ppu.sprite_pattern_lo = state.sprite_pattern_lo;
    ppu.sprite_pattern_hi = state.sprite_pattern_hi;
    ppu.sprite_attr = state.sprite_attr;
    ppu.sprite_x = state.sprite_x;
    ppu.sprite_count = state.sprite_count;
    ppu.sprite0_in_line = state.sprite0_in_line;
    ppu.scanline = state.scanline;
    ppu.dot = state.dot;
    ppu.odd_frame = state.odd_frame;
    ppu.frame = state.frame;
    ppu.dots_in_frame = state.dots_in_frame;
    ppu.warm_up = state.warm_up;
    ppu.suppress_vblank = state.suppress_vblank;
    ppu.nmi_delay = state.nmi_delay;
    ppu.nmi_pending = state.nmi_pending;
    ppu.a12_prev_high = state.a12_prev_high;
    ppu.a12_last_high_dot = state.a12_last_high_dot;
    ppu.total_dots = state.total_dots;
}
