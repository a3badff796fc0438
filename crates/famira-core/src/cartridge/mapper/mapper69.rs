//! Mapper 69 (Sunsoft FME-7).
//!
//! A command/parameter pair drives everything: write the command index to
//! `$8000-$9FFF`, then its parameter to `$A000-$BFFF`. Commands 0-7 set the
//! eight 1 KiB CHR banks, 8 configures the `$6000` window (RAM or ROM with
//! an enable bit), 9-B set the three switchable 8 KiB PRG banks, C sets
//! mirroring, and D-F run a 16-bit CPU-cycle down-counter that raises an
//! IRQ when it wraps below zero.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Capabilities, Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

const PRG_SLOT_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fme7State {
    pub command: u8,
    pub chr_regs: [u8; 8],
    pub prg_regs: [u8; 3],
    pub wram_control: u8,
    pub mirroring_reg: u8,
    pub irq_enabled: bool,
    pub irq_counter_enabled: bool,
    pub irq_counter: u16,
    pub irq_pending: bool,
}

#[derive(Debug, Clone)]
pub struct Fme7 {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    battery: bool,

    command: u8,
    chr_regs: [u8; 8],
    prg_regs: [u8; 3],
    /// Command 8: bit 7 selects RAM, bit 6 enables it, bits 0-5 pick the
    /// ROM bank when RAM is deselected.
    wram_control: u8,
    mirroring_reg: u8,

    irq_enabled: bool,
    irq_counter_enabled: bool,
    irq_counter: u16,
    irq_pending: bool,
}

impl Fme7 {
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
            command: 0,
            chr_regs: [0; 8],
            prg_regs: [0; 3],
            wram_control: 0,
            mirroring_reg: 0,
            irq_enabled: false,
            irq_counter_enabled: false,
            irq_counter: 0,
            irq_pending: false,
        };
        mapper.apply();
        mapper
    }

    fn apply(&mut self) {
        for (slot, &reg) in self.prg_regs.iter().enumerate() {
            self.prg_map.set_8k(slot, reg as isize);
        }
        self.prg_map.set_8k(3, -1);
        for (slot, &reg) in self.chr_regs.iter().enumerate() {
            self.chr_map.set_1k(slot, reg as isize);
        }
    }

    fn wram_selected(&self) -> bool {
        self.wram_control & 0x80 != 0
    }

    fn wram_enabled(&self) -> bool {
        self.wram_control & 0x40 != 0
    }

    fn write_parameter(&mut self, data: u8) {
        match self.command & 0x0F {
            cmd @ 0x0..=0x7 => {
                self.chr_regs[cmd as usize] = data;
                self.apply();
            }
            0x8 => self.wram_control = data,
            cmd @ 0x9..=0xB => {
                self.prg_regs[(cmd - 0x9) as usize] = data & 0x3F;
                self.apply();
            }
            0xC => self.mirroring_reg = data & 0x03,
            0xD => {
                // Writing IRQ control acknowledges any pending IRQ.
                self.irq_enabled = data & 0x01 != 0;
                self.irq_counter_enabled = data & 0x80 != 0;
                self.irq_pending = false;
            }
            0xE => self.irq_counter = (self.irq_counter & 0xFF00) | data as u16,
            _ => self.irq_counter = (self.irq_counter & 0x00FF) | ((data as u16) << 8),
        }
    }
}

impl Mapper for Fme7 {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            cpu_clock_hook: true,
            ..Capabilities::default()
        }
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.command = 0;
            self.chr_regs = [0; 8];
            self.prg_regs = [0; 3];
            self.wram_control = 0;
            self.mirroring_reg = 0;
        }
        self.irq_enabled = false;
        self.irq_counter_enabled = false;
        self.irq_counter = 0;
        self.irq_pending = false;
        self.apply();
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.wram_selected() {
                    if !self.wram_enabled() {
                        return None;
                    }
                    let len = self.prg_ram.len();
                    Some(self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len])
                } else {
                    // ROM mapped into the $6000 window.
                    let bank = (self.wram_control & 0x3F) as usize;
                    let base = bank * PRG_SLOT_SIZE;
                    let offset = (addr - cpu_mem::PRG_RAM_START) as usize;
                    if self.prg_rom.is_empty() {
                        Some(0)
                    } else {
                        Some(self.prg_rom[(base + offset) % self.prg_rom.len()])
                    }
                }
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
                if self.wram_selected() && self.wram_enabled() {
                    let len = self.prg_ram.len();
                    self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
                }
            }
            0x8000..=0x9FFF => self.command = data & 0x0F,
            0xA000..=0xBFFF => self.write_parameter(data),
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
        match self.mirroring_reg {
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
        if !self.irq_counter_enabled {
            return;
        }
        for _ in 0..cycles {
            self.irq_counter = self.irq_counter.wrapping_sub(1);
            if self.irq_counter == 0xFFFF && self.irq_enabled {
                self.irq_pending = true;
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
        69
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("Sunsoft FME-7")
    }

    fn save_state(&self) -> MapperState {
        MapperState::Fme7(Fme7State {
            command: self.command,
            chr_regs: self.chr_regs,
            prg_regs: self.prg_regs,
            wram_control: self.wram_control,
            mirroring_reg: self.mirroring_reg,
            irq_enabled: self.irq_enabled,
            irq_counter_enabled: self.irq_counter_enabled,
            irq_counter: self.irq_counter,
            irq_pending: self.irq_pending,
        })
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Fme7(s) = state {
            self.command = s.command;
            self.chr_regs = s.chr_regs;
            self.prg_regs = s.prg_regs;
            self.wram_control = s.wram_control;
            self.mirroring_reg = s.mirroring_reg;
            self.irq_enabled = s.irq_enabled;
            self.irq_counter_enabled = s.irq_counter_enabled;
            self.irq_counter = s.irq_counter;
            self.irq_pending = s.irq_pending;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board() -> Fme7 {
        let prg: Vec<u8> = (0..32u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let chr: Vec<u8> = (0..64u8).flat_map(|b| vec![b; 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 69,
            mirroring: Mirroring::Vertical,
            battery_backed_ram: true,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        Fme7::new(&header, prg, chr, None)
    }

    fn command(mapper: &mut Fme7, cmd: u8, param: u8) {
        mapper.cpu_write(0x8000, cmd, 0);
        mapper.cpu_write(0xA000, param, 0);
    }

    #[test]
    fn prg_banks_switch_and_last_stays_fixed() {
        let mut fme7 = board();
        command(&mut fme7, 0x9, 4);
        command(&mut fme7, 0xA, 5);
        command(&mut fme7, 0xB, 6);
        assert_eq!(fme7.cpu_read(0x8000), Some(4));
        assert_eq!(fme7.cpu_read(0xA000), Some(5));
        assert_eq!(fme7.cpu_read(0xC000), Some(6));
        assert_eq!(fme7.cpu_read(0xE000), Some(31));
    }

    #[test]
    fn wram_window_switches_between_ram_and_rom() {
        let mut fme7 = board();
        // ROM mode: bank 2 visible at $6000.
        command(&mut fme7, 0x8, 0x02);
        assert_eq!(fme7.cpu_read(0x6000), Some(2));
        // RAM mode enabled: reads/writes hit work RAM.
        command(&mut fme7, 0x8, 0xC0);
        fme7.cpu_write(0x6000, 0x99, 0);
        assert_eq!(fme7.cpu_read(0x6000), Some(0x99));
        // RAM selected but disabled: open bus.
        command(&mut fme7, 0x8, 0x80);
        assert_eq!(fme7.cpu_read(0x6000), None);
    }

    #[test]
    fn irq_fires_on_counter_wrap() {
        let mut fme7 = board();
        command(&mut fme7, 0xE, 0x05); // counter = 5
        command(&mut fme7, 0xF, 0x00);
        command(&mut fme7, 0xD, 0x81); // counter enable + irq enable
        fme7.cpu_clock(5);
        assert!(!fme7.irq_pending());
        fme7.cpu_clock(1);
        assert!(fme7.irq_pending());
        // IRQ-control write acknowledges.
        command(&mut fme7, 0xD, 0x81);
        assert!(!fme7.irq_pending());
    }

    #[test]
    fn chr_banks_are_1k() {
        let mut fme7 = board();
        command(&mut fme7, 0x3, 9);
        assert_eq!(fme7.ppu_read(0x0C00, PpuFetchKind::Background), Some(9));
    }
}
