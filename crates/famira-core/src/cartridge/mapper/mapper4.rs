//! Mapper 4 (MMC3) and its close relatives.
//!
//! Eight bank registers programmed through even/odd pairs in each 8 KiB PRG
//! window: `$8000/$8001` bank select/data, `$A000/$A001` mirroring and
//! PRG-RAM protect, `$C000/$C001` IRQ latch/reload, `$E000/$E001` IRQ
//! disable/enable. The scanline counter is clocked by filtered PPU A12
//! rising edges delivered through `clock_scanline`.
//!
//! Variants sharing the core:
//! - MMC6 (mapper 6): 1 KiB internal work RAM at `$7000` with per-512-byte
//!   read/write enables in `$A001`.
//! - DxROM / Namco 108 (mapper 206): the banking subset only; mirroring and
//!   IRQ registers do not exist.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Capabilities, Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

/// Which board personality an [`Mmc3`] instance emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mmc3Variant {
    Mmc3,
    Mmc6,
    Dxrom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmc3State {
    pub bank_select: u8,
    pub bank_regs: [u8; 8],
    pub mirroring_reg: u8,
    pub prg_ram_protect: u8,
    pub irq_latch: u8,
    pub irq_counter: u8,
    pub irq_reload: bool,
    pub irq_enabled: bool,
    pub irq_pending: bool,
    pub wram: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Mmc3 {
    variant: Mmc3Variant,
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    /// MMC6 internal 1 KiB work RAM (empty on other variants).
    wram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    base_mirroring: Mirroring,
    mirroring_reg: u8,
    battery: bool,

    /// `$8000`: bits 0-2 target register, bit 6 PRG mode, bit 7 CHR invert.
    bank_select: u8,
    bank_regs: [u8; 8],
    /// `$A001`: MMC3 PRG-RAM enable (bit 7) / write protect (bit 6); on
    /// MMC6 the per-block WRAM enables.
    prg_ram_protect: u8,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    pub fn new(
        header: &Header,
        prg_rom: Vec<u8>,
        chr_rom: Vec<u8>,
        trainer: Option<&[u8]>,
        variant: Mmc3Variant,
    ) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let prg_map = PrgMap::new(prg_rom.len());
        let prg_ram = if variant == Mmc3Variant::Mmc6 {
            Vec::new().into_boxed_slice()
        } else {
            allocate_prg_ram(header, trainer)
        };
        let wram = if variant == Mmc3Variant::Mmc6 {
            vec![0u8; 1024].into_boxed_slice()
        } else {
            Vec::new().into_boxed_slice()
        };
        let mut mapper = Self {
            variant,
            prg_ram,
            wram,
            prg_rom,
            chr,
            prg_map,
            chr_map,
            base_mirroring: header.mirroring,
            mirroring_reg: 0,
            battery: header.battery_backed_ram,
            bank_select: 0,
            bank_regs: [0; 8],
            prg_ram_protect: 0,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        };
        mapper.apply();
        mapper
    }

    fn apply(&mut self) {
        let r6 = self.bank_regs[6] as isize;
        let r7 = self.bank_regs[7] as isize;
        if self.bank_select & 0x40 == 0 {
            // Mode 0: swap at $8000, fix $C000 to second-last.
            self.prg_map.set_8k(0, r6);
            self.prg_map.set_8k(1, r7);
            self.prg_map.set_8k(2, -2);
        } else {
            // Mode 1: fixed window moves to $8000.
            self.prg_map.set_8k(0, -2);
            self.prg_map.set_8k(1, r7);
            self.prg_map.set_8k(2, r6);
        }
        self.prg_map.set_8k(3, -1);

        let invert = self.bank_select & 0x80 != 0;
        let (two_k_base, one_k_base) = if invert { (4, 0) } else { (0, 4) };
        self.chr_map
            .set_2k(two_k_base / 2, (self.bank_regs[0] >> 1) as isize);
        self.chr_map
            .set_2k(two_k_base / 2 + 1, (self.bank_regs[1] >> 1) as isize);
        for i in 0..4 {
            self.chr_map
                .set_1k(one_k_base + i, self.bank_regs[2 + i] as isize);
        }
    }

    fn prg_ram_enabled(&self) -> bool {
        !self.prg_ram.is_empty() && self.prg_ram_protect & 0x80 != 0
    }

    fn prg_ram_writable(&self) -> bool {
        self.prg_ram_enabled() && self.prg_ram_protect & 0x40 == 0
    }

    /// MMC6 WRAM decode: 1 KiB mirrored through `$7000-$7FFF`, two 512-byte
    /// blocks gated by `$A001` bits 4-7 (read/write per block).
    fn mmc6_wram_read(&self, addr: u16) -> Option<u8> {
        if !(0x7000..=0x7FFF).contains(&addr) {
            return None;
        }
        let offset = (addr as usize) & 0x3FF;
        let high_block = offset >= 0x200;
        let readable = if high_block {
            self.prg_ram_protect & 0x80 != 0
        } else {
            self.prg_ram_protect & 0x20 != 0
        };
        if readable {
            Some(self.wram[offset])
        } else {
            // Enabled-but-protected blocks read as zero when either block
            // is readable; fully disabled reads decline to open bus.
            if self.prg_ram_protect & 0xA0 != 0 {
                Some(0)
            } else {
                None
            }
        }
    }

    fn mmc6_wram_write(&mut self, addr: u16, data: u8) {
        if !(0x7000..=0x7FFF).contains(&addr) {
            return;
        }
        let offset = (addr as usize) & 0x3FF;
        let high_block = offset >= 0x200;
        let writable = if high_block {
            self.prg_ram_protect & 0xC0 == 0xC0
        } else {
            self.prg_ram_protect & 0x30 == 0x30
        };
        if writable {
            self.wram[offset] = data;
        }
    }

    fn write_register(&mut self, addr: u16, data: u8) {
        let even = addr & 1 == 0;
        match (addr >> 13) & 0b11 {
            0 => {
                if even {
                    self.bank_select = data;
                } else {
                    let index = (self.bank_select & 0x07) as usize;
                    self.bank_regs[index] = if self.variant == Mmc3Variant::Dxrom {
                        // Namco 108 bank registers are 6 bits wide.
                        data & 0x3F
                    } else {
                        data
                    };
                }
                self.apply();
            }
            1 => {
                if self.variant == Mmc3Variant::Dxrom {
                    return;
                }
                if even {
                    self.mirroring_reg = data;
                } else {
                    self.prg_ram_protect = data;
                }
            }
            2 => {
                if self.variant == Mmc3Variant::Dxrom {
                    return;
                }
                if even {
                    self.irq_latch = data;
                } else {
                    self.irq_reload = true;
                }
            }
            _ => {
                if self.variant == Mmc3Variant::Dxrom {
                    return;
                }
                if even {
                    self.irq_enabled = false;
                    self.irq_pending = false;
                } else {
                    self.irq_enabled = true;
                }
            }
        }
    }
}

impl Mapper for Mmc3 {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            scanline_irq: self.variant != Mmc3Variant::Dxrom,
            ..Capabilities::default()
        }
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.bank_select = 0;
            self.bank_regs = [0; 8];
            self.mirroring_reg = 0;
            self.prg_ram_protect = 0;
        }
        self.irq_latch = 0;
        self.irq_counter = 0;
        self.irq_reload = false;
        self.irq_enabled = false;
        self.irq_pending = false;
        self.apply();
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.variant == Mmc3Variant::Mmc6 {
                    return self.mmc6_wram_read(addr);
                }
                if !self.prg_ram_enabled() {
                    return None;
                }
                let len = self.prg_ram.len();
                Some(self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len])
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                Some(self.prg_map.read(&self.prg_rom, addr))
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, data: u8, _instr: u64) {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.variant == Mmc3Variant::Mmc6 {
                    self.mmc6_wram_write(addr, data);
                } else if self.prg_ram_writable() {
                    let len = self.prg_ram.len();
                    self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
                }
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => self.write_register(addr, data),
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16, _kind: PpuFetchKind) -> Option<u8> {
        Some(self.chr.read(&self.chr_map, addr))
    }

    fn ppu_write(&mut self, addr: u16, data: u8) -> bool {
        self.chr.write(&self.chr_map, addr, data);
        true
    }

    fn mirroring(&self) -> Mirroring {
        if self.base_mirroring == Mirroring::FourScreen || self.variant == Mmc3Variant::Dxrom {
            return self.base_mirroring;
        }
        if self.mirroring_reg & 1 == 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    fn clock_scanline(&mut self) {
        if self.irq_reload || self.irq_counter == 0 {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        if self.variant == Mmc3Variant::Mmc6 {
            Some(&self.wram)
        } else if self.prg_ram.is_empty() {
            None
        } else {
            Some(&self.prg_ram)
        }
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        if self.variant == Mmc3Variant::Mmc6 {
            Some(&mut self.wram)
        } else if self.prg_ram.is_empty() {
            None
        } else {
            Some(&mut self.prg_ram)
        }
    }

    fn prg_save_ram(&self) -> Option<&[u8]> {
        if self.battery {
            self.prg_ram()
        } else {
            None
        }
    }

    fn prg_save_ram_mut(&mut self) -> Option<&mut [u8]> {
        if self.battery {
            self.prg_ram_mut()
        } else {
            None
        }
    }

    fn chr_ram(&self) -> Option<&[u8]> {
        self.chr.as_ram()
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        self.chr.as_ram_mut()
    }

    fn mapper_id(&self) -> u16 {
        match self.variant {
            Mmc3Variant::Mmc3 => 4,
            Mmc3Variant::Mmc6 => 6,
            Mmc3Variant::Dxrom => 206,
        }
    }

    fn name(&self) -> Cow<'static, str> {
        match self.variant {
            Mmc3Variant::Mmc3 => Cow::Borrowed("MMC3"),
            Mmc3Variant::Mmc6 => Cow::Borrowed("MMC6"),
            Mmc3Variant::Dxrom => Cow::Borrowed("DxROM"),
        }
    }

    fn save_state(&self) -> MapperState {
        MapperState::Mmc3(Mmc3State {
            bank_select: self.bank_select,
            bank_regs: self.bank_regs,
            mirroring_reg: self.mirroring_reg,
            prg_ram_protect: self.prg_ram_protect,
            irq_latch: self.irq_latch,
            irq_counter: self.irq_counter,
            irq_reload: self.irq_reload,
            irq_enabled: self.irq_enabled,
            irq_pending: self.irq_pending,
            wram: self.wram.to_vec(),
        })
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Mmc3(s) = state {
            self.bank_select = s.bank_select;
            self.bank_regs = s.bank_regs;
            self.mirroring_reg = s.mirroring_reg;
            self.prg_ram_protect = s.prg_ram_protect;
            self.irq_latch = s.irq_latch;
            self.irq_counter = s.irq_counter;
            self.irq_reload = s.irq_reload;
            self.irq_enabled = s.irq_enabled;
            self.irq_pending = s.irq_pending;
            if self.wram.len() == s.wram.len() {
                self.wram.copy_from_slice(&s.wram);
            }
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board(variant: Mmc3Variant) -> Mmc3 {
        let prg: Vec<u8> = (0..16u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let chr: Vec<u8> = (0..32u8).flat_map(|b| vec![b; 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 4,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        Mmc3::new(&header, prg, chr, None, variant)
    }

    #[test]
    fn prg_mode_swaps_fixed_windows() {
        let mut mmc3 = board(Mmc3Variant::Mmc3);
        mmc3.cpu_write(0x8000, 6, 0);
        mmc3.cpu_write(0x8001, 4, 0);
        assert_eq!(mmc3.cpu_read(0x8000), Some(4));
        assert_eq!(mmc3.cpu_read(0xC000), Some(14));
        assert_eq!(mmc3.cpu_read(0xE000), Some(15));

        // Flip to mode 1: the fixed window moves to $8000.
        mmc3.cpu_write(0x8000, 0x46, 0);
        assert_eq!(mmc3.cpu_read(0x8000), Some(14));
        assert_eq!(mmc3.cpu_read(0xC000), Some(4));
    }

    #[test]
    fn chr_inversion_swaps_halves() {
        let mut mmc3 = board(Mmc3Variant::Mmc3);
        mmc3.cpu_write(0x8000, 0, 0);
        mmc3.cpu_write(0x8001, 8, 0); // R0 = bank pair 8/9
        assert_eq!(mmc3.ppu_read(0x0000, PpuFetchKind::Background), Some(8));
        mmc3.cpu_write(0x8000, 0x80, 0);
        assert_eq!(mmc3.ppu_read(0x1000, PpuFetchKind::Background), Some(8));
    }

    #[test]
    fn irq_counts_down_and_fires() {
        let mut mmc3 = board(Mmc3Variant::Mmc3);
        mmc3.cpu_write(0xC000, 3, 0); // latch
        mmc3.cpu_write(0xC001, 0, 0); // reload on next clock
        mmc3.cpu_write(0xE001, 0, 0); // enable
        for _ in 0..3 {
            mmc3.clock_scanline();
            assert!(!mmc3.irq_pending());
        }
        mmc3.clock_scanline();
        assert!(mmc3.irq_pending());
        // $E000 acknowledges and disables.
        mmc3.cpu_write(0xE000, 0, 0);
        assert!(!mmc3.irq_pending());
    }

    #[test]
    fn dxrom_ignores_mirroring_and_irq() {
        let mut dx = board(Mmc3Variant::Dxrom);
        dx.cpu_write(0xA000, 0x01, 0);
        assert_eq!(dx.mirroring(), Mirroring::Horizontal);
        dx.cpu_write(0xC000, 1, 0);
        dx.cpu_write(0xC001, 0, 0);
        dx.cpu_write(0xE001, 0, 0);
        dx.clock_scanline();
        dx.clock_scanline();
        assert!(!dx.irq_pending());
    }

    #[test]
    fn mmc6_wram_blocks_gate_reads_and_writes() {
        let mut mmc6 = board(Mmc3Variant::Mmc6);
        // Enable low block read+write only (bits 4-5).
        mmc6.cpu_write(0xA001, 0x30, 0);
        mmc6.cpu_write(0x7000, 0x42, 0);
        assert_eq!(mmc6.cpu_read(0x7000), Some(0x42));
        // High block is enabled-but-protected: reads back zero.
        mmc6.cpu_write(0x7200, 0x55, 0);
        assert_eq!(mmc6.cpu_read(0x7200), Some(0));
    }
}
