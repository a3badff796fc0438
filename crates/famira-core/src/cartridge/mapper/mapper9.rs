//! Mappers 9 and 10 (MMC2 / MMC4).
//!
//! Both boards keep two CHR latches, one per 4 KiB pattern half. Pattern
//! fetches inside the documented windows (`$0FD8-$0FDF`, `$0FE8-$0FEF`, and
//! the same offsets in the upper table) flip the corresponding latch to
//! `$FD` or `$FE` *after* the byte is returned, selecting between two bank
//! registers for that half on the following fetch. Punch-Out!! animates its
//! ring this way without any CPU involvement.
//!
//! MMC2 switches one 8 KiB PRG bank and fixes the last three; MMC4 switches
//! 16 KiB and fixes the last 16 KiB.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Capabilities, Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChrLatchVariant {
    Mmc2,
    Mmc4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChrLatchState {
    pub prg_bank: u8,
    /// `[FD/0, FE/0, FD/1, FE/1]` bank registers.
    pub chr_regs: [u8; 4],
    /// Current latch selection per half: `false` = $FD, `true` = $FE.
    pub latch_fe: [bool; 2],
    pub mirroring_reg: u8,
}

#[derive(Debug, Clone)]
pub struct ChrLatchBoard {
    variant: ChrLatchVariant,
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    battery: bool,

    prg_bank: u8,
    chr_regs: [u8; 4],
    latch_fe: [bool; 2],
    mirroring_reg: u8,
}

impl ChrLatchBoard {
    pub fn new(
        header: &Header,
        prg_rom: Vec<u8>,
        chr_rom: Vec<u8>,
        trainer: Option<&[u8]>,
        variant: ChrLatchVariant,
    ) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let prg_map = PrgMap::new(prg_rom.len());
        let mut mapper = Self {
            variant,
            prg_ram: allocate_prg_ram(header, trainer),
            prg_rom,
            chr,
            prg_map,
            chr_map,
            battery: header.battery_backed_ram,
            prg_bank: 0,
            chr_regs: [0; 4],
            latch_fe: [true; 2],
            mirroring_reg: 0,
        };
        mapper.apply();
        mapper
    }

    fn apply(&mut self) {
        match self.variant {
            ChrLatchVariant::Mmc2 => {
                self.prg_map.set_8k(0, self.prg_bank as isize);
                self.prg_map.set_8k(1, -3);
                self.prg_map.set_8k(2, -2);
                self.prg_map.set_8k(3, -1);
            }
            ChrLatchVariant::Mmc4 => {
                self.prg_map.set_16k(0, (self.prg_bank & 0x0F) as isize);
                self.prg_map.set_16k(1, -1);
            }
        }
        for half in 0..2 {
            let reg = self.chr_regs[half * 2 + usize::from(self.latch_fe[half])];
            self.chr_map.set_4k(half, reg as isize);
        }
    }

    /// Latch windows: `$xFD8-$xFDF` selects $FD, `$xFE8-$xFEF` selects
    /// $FE, in either pattern half.
    fn update_latch(&mut self, addr: u16) {
        let half = usize::from(addr & 0x1000 != 0);
        match addr & 0x0FF8 {
            0x0FD8 => {
                self.latch_fe[half] = false;
                self.apply();
            }
            0x0FE8 => {
                self.latch_fe[half] = true;
                self.apply();
            }
            _ => {}
        }
    }
}

impl Mapper for ChrLatchBoard {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chr_latch: true,
            ..Capabilities::default()
        }
    }

    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.prg_bank = 0;
            self.chr_regs = [0; 4];
            self.mirroring_reg = 0;
        }
        self.latch_fe = [true; 2];
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
        match addr {
            cpu_mem::PRG_RAM_START..=cpu_mem::PRG_RAM_END => {
                let len = self.prg_ram.len();
                self.prg_ram[(addr - cpu_mem::PRG_RAM_START) as usize % len] = data;
            }
            0xA000..=0xAFFF => {
                self.prg_bank = data & 0x0F;
                self.apply();
            }
            0xB000..=0xBFFF => {
                self.chr_regs[0] = data & 0x1F;
                self.apply();
            }
            0xC000..=0xCFFF => {
                self.chr_regs[1] = data & 0x1F;
                self.apply();
            }
            0xD000..=0xDFFF => {
                self.chr_regs[2] = data & 0x1F;
                self.apply();
            }
            0xE000..=0xEFFF => {
                self.chr_regs[3] = data & 0x1F;
                self.apply();
            }
            0xF000..=0xFFFF => {
                self.mirroring_reg = data;
            }
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16, _kind: PpuFetchKind) -> Option<u8> {
        let value = self.chr.read(&self.chr_map, addr);
        // The latch flips after the fetch completes, so the returned byte
        // still comes from the old bank.
        self.update_latch(addr);
        Some(value)
    }

    fn ppu_write(&mut self, addr: u16, data: u8) -> bool {
        self.chr.write(&self.chr_map, addr, data);
        true
    }

    fn mirroring(&self) -> Mirroring {
        if self.mirroring_reg & 1 == 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
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
        match self.variant {
            ChrLatchVariant::Mmc2 => 9,
            ChrLatchVariant::Mmc4 => 10,
        }
    }

    fn name(&self) -> Cow<'static, str> {
        match self.variant {
            ChrLatchVariant::Mmc2 => Cow::Borrowed("MMC2"),
            ChrLatchVariant::Mmc4 => Cow::Borrowed("MMC4"),
        }
    }

    fn save_state(&self) -> MapperState {
        MapperState::ChrLatch(ChrLatchState {
            prg_bank: self.prg_bank,
            chr_regs: self.chr_regs,
            latch_fe: self.latch_fe,
            mirroring_reg: self.mirroring_reg,
        })
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::ChrLatch(s) = state {
            self.prg_bank = s.prg_bank;
            self.chr_regs = s.chr_regs;
            self.latch_fe = s.latch_fe;
            self.mirroring_reg = s.mirroring_reg;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board(variant: ChrLatchVariant) -> ChrLatchBoard {
        let prg: Vec<u8> = (0..16u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let chr: Vec<u8> = (0..32u8).flat_map(|b| vec![b; 4 * 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 9,
            mirroring: Mirroring::Vertical,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        ChrLatchBoard::new(&header, prg, chr, None, variant)
    }

    #[test]
    fn mmc2_fixes_last_three_banks() {
        let mut mmc2 = board(ChrLatchVariant::Mmc2);
        mmc2.cpu_write(0xA000, 5, 0);
        assert_eq!(mmc2.cpu_read(0x8000), Some(5));
        assert_eq!(mmc2.cpu_read(0xA000), Some(13));
        assert_eq!(mmc2.cpu_read(0xC000), Some(14));
        assert_eq!(mmc2.cpu_read(0xE000), Some(15));
    }

    #[test]
    fn fetch_in_latch_window_switches_bank_for_next_fetch() {
        let mut mmc2 = board(ChrLatchVariant::Mmc2);
        mmc2.cpu_write(0xB000, 2, 0); // FD/0
        mmc2.cpu_write(0xC000, 3, 0); // FE/0
        // Latch starts at FE: reads come from bank 3.
        assert_eq!(mmc2.ppu_read(0x0000, PpuFetchKind::Background), Some(3));
        // A fetch in the $0FD8 window returns the old bank, then flips.
        assert_eq!(mmc2.ppu_read(0x0FD8, PpuFetchKind::Background), Some(3));
        assert_eq!(mmc2.ppu_read(0x0000, PpuFetchKind::Background), Some(2));
        // And back via the $0FE8 window.
        assert_eq!(mmc2.ppu_read(0x0FE8, PpuFetchKind::Background), Some(2));
        assert_eq!(mmc2.ppu_read(0x0000, PpuFetchKind::Background), Some(3));
    }

    #[test]
    fn upper_table_latch_is_independent() {
        let mut mmc4 = board(ChrLatchVariant::Mmc4);
        mmc4.cpu_write(0xD000, 7, 0); // FD/1
        mmc4.cpu_write(0xE000, 9, 0); // FE/1
        assert_eq!(mmc4.ppu_read(0x1000, PpuFetchKind::Sprite), Some(9));
        mmc4.ppu_read(0x1FDA, PpuFetchKind::Sprite);
        assert_eq!(mmc4.ppu_read(0x1000, PpuFetchKind::Sprite), Some(7));
        // Lower half latch untouched.
        assert_eq!(mmc4.ppu_read(0x0000, PpuFetchKind::Sprite), Some(0));
    }
}
