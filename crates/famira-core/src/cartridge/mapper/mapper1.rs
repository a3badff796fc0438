//! Mapper 1 (MMC1).
//!
//! All four internal registers are programmed through a 5-bit serial shift
//! register: five writes with the data in bit 0 latch the assembled value
//! into the register addressed by bits 13-14 of the final write. A write
//! with bit 7 set resets the shifter and forces PRG mode 3 (fixed last
//! bank). Writes issued by the same CPU instruction (read-modify-write
//! opcodes produce two) only shift once; the repeats are ignored.
//!
//! On 512 KiB boards (SUROM) CHR register bit 4 selects a 256 KiB outer PRG
//! block, and the "fixed" bank in mode 3 is the last bank of that block.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

const PRG_BANK_SIZE_16K: usize = 16 * 1024;
const OUTER_BLOCK_BANKS: isize = 16; // 256 KiB in 16 KiB banks

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmc1State {
    pub control: u8,
    pub chr_bank0: u8,
    pub chr_bank1: u8,
    pub prg_bank: u8,
    pub shift_reg: u8,
    pub shift_count: u8,
    pub last_write_instr: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Mmc1 {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    battery: bool,

    /// Control register: bits 0-1 mirroring, 2-3 PRG mode, 4 CHR mode.
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    /// PRG bank select; bit 4 disables PRG RAM on MMC1B boards.
    prg_bank: u8,

    shift_reg: u8,
    shift_count: u8,
    /// Instruction counter of the previous serial write. A second write from
    /// the same instruction is discarded.
    last_write_instr: Option<u64>,
}

impl Mmc1 {
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
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
            shift_reg: 0x10,
            shift_count: 0,
            last_write_instr: None,
        };
        mapper.apply();
        mapper
    }

    fn prg_ram_enabled(&self) -> bool {
        self.prg_bank & 0x10 == 0
    }

    /// 256 KiB outer block base (in 16 KiB banks) for oversized boards.
    fn outer_block(&self) -> isize {
        if self.prg_rom.len() >= 512 * 1024 && self.chr_bank0 & 0x10 != 0 {
            OUTER_BLOCK_BANKS
        } else {
            0
        }
    }

    fn apply(&mut self) {
        let outer = self.outer_block();
        let bank = (self.prg_bank & 0x0F) as isize;
        let block_banks = if self.prg_rom.len() >= 512 * 1024 {
            OUTER_BLOCK_BANKS
        } else {
            (self.prg_rom.len() / PRG_BANK_SIZE_16K).max(1) as isize
        };

        match (self.control >> 2) & 0b11 {
            // 32 KiB mode; bank low bit ignored.
            0 | 1 => {
                let even = bank & !1;
                self.prg_map.set_16k(0, outer + even);
                self.prg_map.set_16k(1, outer + even + 1);
            }
            // Fix first bank at $8000, switch at $C000.
            2 => {
                self.prg_map.set_16k(0, outer);
                self.prg_map.set_16k(1, outer + bank);
            }
            // Switch at $8000, fix last bank of the block at $C000.
            _ => {
                self.prg_map.set_16k(0, outer + bank);
                self.prg_map.set_16k(1, outer + block_banks - 1);
            }
        }

        if self.control & 0x10 == 0 {
            // 8 KiB CHR mode, low bit of bank 0 ignored.
            self.chr_map.set_4k(0, (self.chr_bank0 & !1) as isize);
            self.chr_map.set_4k(1, (self.chr_bank0 | 1) as isize);
        } else {
            self.chr_map.set_4k(0, self.chr_bank0 as isize);
            self.chr_map.set_4k(1, self.chr_bank1 as isize);
        }
    }

    fn write_register(&mut self, addr: u16, data: u8, instr: u64) {
        if data & 0x80 != 0 {
            self.shift_reg = 0x10;
            self.shift_count = 0;
            self.control |= 0x0C;
            self.last_write_instr = None;
            self.apply();
            return;
        }

        // Read-modify-write opcodes write twice in one instruction; only
        // the first write shifts.
        if self.last_write_instr == Some(instr) {
            return;
        }
        self.last_write_instr = Some(instr);

        let bit = data & 1;
        self.shift_reg >>= 1;
        self.shift_reg |= bit << 4;
        self.shift_count += 1;

        if self.shift_count == 5 {
            let value = self.shift_reg & 0x1F;
            match (addr >> 13) & 0b11 {
                0 => self.control = value,
                1 => self.chr_bank0 = value,
                2 => self.chr_bank1 = value,
                _ => self.prg_bank = value,
            }
            self.shift_reg = 0x10;
            self.shift_count = 0;
            self.apply();
        }
    }
}

impl Mapper for Mmc1 {
    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.control = 0x0C;
            self.chr_bank0 = 0;
            self.chr_bank1 = 0;
            self.prg_bank = 0;
        }
        self.shift_reg = 0x10;
        self.shift_count = 0;
        self.last_write_instr = None;
        self.apply();
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
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

    fn cpu_write(&mut self, addr: u16, data: u8, instr: u64) {
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                if self.prg_ram_enabled() {
                    let len = self.prg_ram.len();
                    self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
                }
            }
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => self.write_register(addr, data, instr),
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
        match self.control & 0b11 {
            0 => Mirroring::SingleScreenLower,
            1 => Mirroring::SingleScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
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
        1
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("MMC1")
    }

    fn save_state(&self) -> MapperState {
        MapperState::Mmc1(Mmc1State {
            control: self.control,
            chr_bank0: self.chr_bank0,
            chr_bank1: self.chr_bank1,
            prg_bank: self.prg_bank,
            shift_reg: self.shift_reg,
            shift_count: self.shift_count,
            last_write_instr: self.last_write_instr,
        })
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::Mmc1(s) = state {
            self.control = s.control;
            self.chr_bank0 = s.chr_bank0;
            self.chr_bank1 = s.chr_bank1;
            self.prg_bank = s.prg_bank;
            self.shift_reg = s.shift_reg;
            self.shift_count = s.shift_count;
            self.last_write_instr = s.last_write_instr;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board(banks_16k: usize) -> Mmc1 {
        let prg: Vec<u8> = (0..banks_16k)
            .flat_map(|b| vec![b as u8; PRG_BANK_SIZE_16K])
            .collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 1,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: 0,
            chr_ram_size: 8 * 1024,
            prg_ram_size: 8 * 1024,
        };
        Mmc1::new(&header, prg, vec![], None)
    }

    fn serial_write(mapper: &mut Mmc1, addr: u16, value: u8, instr: &mut u64) {
        for i in 0..5 {
            mapper.cpu_write(addr, (value >> i) & 1, *instr);
            *instr += 1;
        }
    }

    #[test]
    fn powers_on_with_fixed_last_bank() {
        let mut mmc1 = board(4);
        assert_eq!(mmc1.cpu_read(0x8000), Some(0));
        assert_eq!(mmc1.cpu_read(0xC000), Some(3));
    }

    #[test]
    fn serial_writes_latch_after_five_bits() {
        let mut mmc1 = board(4);
        let mut instr = 0;
        serial_write(&mut mmc1, 0xE000, 2, &mut instr);
        assert_eq!(mmc1.cpu_read(0x8000), Some(2));
        assert_eq!(mmc1.cpu_read(0xC000), Some(3));
    }

    #[test]
    fn repeat_write_from_same_instruction_is_ignored() {
        let mut mmc1 = board(4);
        // An RMW instruction writes twice with the same instruction count.
        mmc1.cpu_write(0x8000, 1, 7);
        mmc1.cpu_write(0x8000, 1, 7);
        assert_eq!(mmc1.shift_count, 1);
    }

    #[test]
    fn bit7_resets_shifter_and_forces_mode3() {
        let mut mmc1 = board(4);
        let mut instr = 0;
        // Put the board in 32 KiB mode first.
        serial_write(&mut mmc1, 0x8000, 0x00, &mut instr);
        mmc1.cpu_write(0x8000, 0x80, instr);
        assert_eq!(mmc1.control & 0x0C, 0x0C);
        assert_eq!(mmc1.shift_count, 0);
        assert_eq!(mmc1.cpu_read(0xC000), Some(3));
    }

    #[test]
    fn mirroring_follows_control() {
        let mut mmc1 = board(2);
        let mut instr = 0;
        serial_write(&mut mmc1, 0x8000, 0x02 | 0x0C, &mut instr);
        assert_eq!(mmc1.mirroring(), Mirroring::Vertical);
        serial_write(&mut mmc1, 0x8000, 0x00 | 0x0C, &mut instr);
        assert_eq!(mmc1.mirroring(), Mirroring::SingleScreenLower);
    }

    #[test]
    fn chr_bit4_selects_outer_prg_block_on_512k() {
        let mut mmc1 = board(32); // 512 KiB
        let mut instr = 0;
        serial_write(&mut mmc1, 0xA000, 0x10, &mut instr);
        // Mode 3: switchable bank 0 of the upper block, fixed last of block.
        assert_eq!(mmc1.cpu_read(0x8000), Some(16));
        assert_eq!(mmc1.cpu_read(0xC000), Some(31));
    }
}
