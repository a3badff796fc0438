//! Mapper 25 (Konami VRC2/VRC4).
//!
//! Implemented with the VRC4 register layout, which is a superset of the
//! VRC2 boards that share this id. Address lines A0/A1 arrive swapped on
//! mapper 25, so sub-register decode accepts both orderings. The eight CHR
//! registers are 8 bits wide, written as two 4-bit halves. The optional IRQ
//! counter counts scanlines through a 341/3 CPU-cycle prescaler, or raw CPU
//! cycles when the control register requests cycle mode.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Capabilities, Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vrc4State {
    pub prg_regs: [u8; 2],
    pub prg_swap: bool,
    pub chr_regs: [u8; 8],
    pub mirroring_reg: u8,
    pub irq_latch: u8,
    pub irq_counter: u8,
    pub irq_enabled: bool,
    pub irq_enable_after_ack: bool,
    pub irq_cycle_mode: bool,
    pub irq_prescaler: i16,
    pub irq_pending: bool,
}

#[derive(Debug, Clone)]
pub struct Vrc4 {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    battery: bool,

    prg_regs: [u8; 2],
    prg_swap: bool,
    chr_regs: [u8; 8],
    mirroring_reg: u8,

    irq_latch: u8,
    irq_counter: u8,
    irq_enabled: bool,
    irq_enable_after_ack: bool,
    irq_cycle_mode: bool,
    /// Scanline prescaler; counts down by 3 per CPU cycle from 341.
    irq_prescaler: i16,
    irq_pending: bool,
}

impl Vrc4 {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, trainer: Option<&[u8]>) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let prg_map = PrgMap::new(prg_rom.len());
        let mut mapper = Self {
            prg_ram: allocate_prg_ram(header, trainer),
            prg_rom,
            chr,
            prg_map,
            chr_map,
            battery: header.battery_backed_ram,
            prg_regs: [0; 2],
            prg_swap: false,
            chr_regs: [0; 8],
            mirroring_reg: 0,
            irq_latch: 0,
            irq_counter: 0,
            irq_enabled: false,
            irq_enable_after_ack: false,
            irq_cycle_mode: false,
            irq_prescaler: 341,
            irq_pending: false,
        };
        mapper.apply();
        mapper
    }

    fn apply(&mut self) {
        if self.prg_swap {
            self.prg_map.set_8k(0, -2);
            self.prg_map.set_8k(2, self.prg_regs[0] as isize);
        } else {
            self.prg_map.set_8k(0, self.prg_regs[0] as isize);
            self.prg_map.set_8k(2, -2);
        }
        self.prg_map.set_8k(1, self.prg_regs[1] as isize);
        self.prg_map.set_8k(3, -1);
        for (slot, &reg) in self.chr_regs.iter().enumerate() {
            self.chr_map.set_1k(slot, reg as isize);
        }
    }

    /// Sub-register index with the mapper-25 A0/A1 swap folded in: the
    /// VRC4b/d boards behind this id wire CPU A1 to the chip's A0 and vice
    /// versa, so logical sub-register 1 sits at physical `$xx02`.
    fn sub_reg(addr: u16) -> usize {
        let a0 = (addr & 1) as usize;
        let a1 = ((addr >> 1) & 1) as usize;
        (a0 << 1) | a1
    }

    fn clock_irq(&mut self) {
        if self.irq_counter == 0xFF {
            self.irq_counter = self.irq_latch;
            self.irq_pending = true;
        } else {
            self.irq_counter += 1;
        }
    }
}

impl Mapper for Vrc4 {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            cpu_clock_hook: true,
            ..Capabilities::default()
        }
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.prg_regs = [0; 2];
            self.prg_swap = false;
            self.chr_regs = [0; 8];
            self.mirroring_reg = 0;
        }
        self.irq_latch = 0;
        self.irq_counter = 0;
        self.irq_enabled = false;
        self.irq_enable_after_ack = false;
        self.irq_cycle_mode = false;
        self.irq_prescaler = 341;
        self.irq_pending = false;
        self.apply();
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
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
        if (cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END).contains(&addr) {
            let len = self.prg_ram.len();
            self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
            return;
        }
        if addr < cpu_mem::PRG_ROM_START {
            return;
        }

        let sub = Self::sub_reg(addr);
        match addr & 0xF000 {
            0x8000 => {
                self.prg_regs[0] = data & 0x1F;
                self.apply();
            }
            0x9000 => {
                if sub < 2 {
                    self.mirroring_reg = data & 0x03;
                } else {
                    self.prg_swap = data & 0x02 != 0;
                    self.apply();
                }
            }
            0xA000 => {
                self.prg_regs[1] = data & 0x1F;
                self.apply();
            }
            0xB000..=0xE000 => {
                let base = ((addr >> 12) - 0xB) as usize * 2;
                let reg = base + (sub >> 1);
                if sub & 1 == 0 {
                    self.chr_regs[reg] = (self.chr_regs[reg] & 0xF0) | (data & 0x0F);
                } else {
                    self.chr_regs[reg] = (self.chr_regs[reg] & 0x0F) | (data << 4);
                }
                self.apply();
            }
            0xF000 => match sub {
                0 => self.irq_latch = (self.irq_latch & 0xF0) | (data & 0x0F),
                1 => self.irq_latch = (self.irq_latch & 0x0F) | (data << 4),
                2 => {
                    self.irq_pending = false;
                    self.irq_enable_after_ack = data & 0x01 != 0;
                    self.irq_enabled = data & 0x02 != 0;
                    self.irq_cycle_mode = data & 0x04 != 0;
                    if self.irq_enabled {
                        self.irq_counter = self.irq_latch;
                        self.irq_prescaler = 341;
                    }
                }
                _ => {
                    self.irq_pending = false;
                    self.irq_enabled = self.irq_enable_after_ack;
                }
            },
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
        match self.mirroring_reg & 0x03 {
            0 => Mirroring::Vertical,
            1 => Mirroring::Horizontal,
            2 => Mirroring::SingleScreenLower,
            _ => Mirroring::SingleScreenUpper,
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    fn cpu_clock(&mut self, cycles: u32) {
        if !self.irq_enabled {
            return;
        }
        for _ in 0..cycles {
            if self.irq_cycle_mode {
                self.clock_irq();
            } else {
                self.irq_prescaler -= 3;
                if self.irq_prescaler <= 0 {
                    self.irq_prescaler += 341;
                    self.clock_irq();
                }
            }
        }
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }

    fn prg_save_ram(&self) -> Option<&[u8]> {
        self.battery.then_some(&*self.prg_ram)
    }

    fn prg_save_ram_mut(&mut self) -> Option<&mut [u8]> {
        if self.battery {
            Some(&mut self.prg_ram)
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
        25
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("VRC2/VRC4")
    }

    fn save_state(&self) -> MapperState {
        MapperState::Vrc4(Vrc4State {
            prg_regs: self.prg_regs,
            prg_swap: self.prg_swap,
            chr_regs: self.chr_regs,
            mirroring_reg: self.mirroring_reg,
            irq_latch: self.irq_latch,
            irq_counter: self.irq_counter,
            irq_enabled: self.irq_enabled,
            irq_enable_after_ack: self.irq_enable_after_ack,
            irq_cycle_mode: self.irq_cycle_mode,
            irq_prescaler: self.irq_prescaler,
            irq_pending: self.irq_pending,
        })
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Vrc4(s) = state {
            self.prg_regs = s.prg_regs;
            self.prg_swap = s.prg_swap;
            self.chr_regs = s.chr_regs;
            self.mirroring_reg = s.mirroring_reg;
            self.irq_latch = s.irq_latch;
            self.irq_counter = s.irq_counter;
            self.irq_enabled = s.irq_enabled;
            self.irq_enable_after_ack = s.irq_enable_after_ack;
            self.irq_cycle_mode = s.irq_cycle_mode;
            self.irq_prescaler = s.irq_prescaler;
            self.irq_pending = s.irq_pending;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board() -> Vrc4 {
        let prg: Vec<u8> = (0..16u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let chr: Vec<u8> = (0..64u8).flat_map(|b| vec![b; 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 25,
            mirroring: Mirroring::Vertical,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        Vrc4::new(&header, prg, chr, None)
    }

    #[test]
    fn chr_registers_assemble_from_nibbles() {
        let mut vrc = board();
        // CHR reg 0 lives at $B000 (low) / $B002-or-$B001 (high).
        vrc.cpu_write(0xB000, 0x05, 0);
        vrc.cpu_write(0xB002, 0x02, 0);
        assert_eq!(vrc.chr_regs[0], 0x25);
        assert_eq!(vrc.ppu_read(0x0000, PpuFetchKind::Data), Some(0x25));
    }

    #[test]
    fn prg_swap_mode_moves_fixed_bank() {
        let mut vrc = board();
        vrc.cpu_write(0x8000, 3, 0);
        assert_eq!(vrc.cpu_read(0x8000), Some(3));
        assert_eq!(vrc.cpu_read(0xC000), Some(14));
        // Swap mode lives at logical $9002 = physical $9001 on this wiring.
        vrc.cpu_write(0x9001, 0x02, 0);
        assert_eq!(vrc.cpu_read(0x8000), Some(14));
        assert_eq!(vrc.cpu_read(0xC000), Some(3));
    }

    #[test]
    fn scanline_irq_counts_up_from_latch() {
        let mut vrc = board();
        vrc.cpu_write(0xF000, 0x0E, 0); // latch = 0xFE
        vrc.cpu_write(0xF001, 0x0F, 0);
        vrc.cpu_write(0xF002, 0x02, 0); // enable, scanline mode
        // Counter starts at 0xFE; two scanline ticks reach the reload.
        vrc.cpu_clock(114); // one prescaler expiry
        assert!(!vrc.irq_pending());
        vrc.cpu_clock(228);
        assert!(vrc.irq_pending());
        // Ack via $F003.
        vrc.cpu_write(0xF003, 0, 0);
        assert!(!vrc.irq_pending());
    }
}
