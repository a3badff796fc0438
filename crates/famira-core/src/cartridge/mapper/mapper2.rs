//! Mapper 2 (UxROM).
//!
//! Writes anywhere in `$8000-$FFFF` select the 16 KiB bank at `$8000`; the
//! last 16 KiB bank stays fixed at `$C000`. CHR is almost always RAM.

use std::borrow::Cow;

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{allocate_prg_ram, ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone)]
pub struct Uxrom {
    prg_rom: Vec<u8>,
    prg_ram: Box<[u8]>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    mirroring: Mirroring,
    bank: u8,
}

impl Uxrom {
    pub fn new(header: &Header, prg_rom: Vec<u8>, chr_rom: Vec<u8>, trainer: Option<&[u8]>) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let mut prg_map = PrgMap::new(prg_rom.len());
        prg_map.set_16k(0, 0);
        prg_map.set_16k(1, -1);
        Self {
            prg_ram: allocate_prg_ram(header, trainer),
            prg_rom,
            chr,
            prg_map,
            chr_map,
            mirroring: header.mirroring,
            bank: 0,
        }
    }

    fn apply(&mut self) {
        self.prg_map.set_16k(0, self.bank as isize);
        self.prg_map.set_16k(1, -1);
    }
}

impl Mapper for Uxrom {
    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.bank = 0;
            self.apply();
        }
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
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                self.bank = data;
                self.apply();
            }
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
        self.mirroring
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        Some(&self.prg_ram)
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.prg_ram)
    }

    fn chr_ram(&self) -> Option<&[u8]> {
        self.chr.as_ram()
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        self.chr.as_ram_mut()
    }

    fn mapper_id(&self) -> u16 {
        2
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("UxROM")
    }

    fn save_state(&self) -> MapperState {
        MapperState::SingleRegister { reg: self.bank }
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::SingleRegister { reg } = state {
            self.bank = *reg;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board(banks: usize) -> Uxrom {
        let prg: Vec<u8> = (0..banks as u8).flat_map(|b| vec![b; 16 * 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 2,
            mirroring: Mirroring::Vertical,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: 0,
            chr_ram_size: 8 * 1024,
            prg_ram_size: 8 * 1024,
        };
        Uxrom::new(&header, prg, vec![], None)
    }

    #[test]
    fn fixes_last_bank_at_c000() {
        let mut uxrom = board(8);
        assert_eq!(uxrom.cpu_read(0xC000), Some(7));
        uxrom.cpu_write(0x8000, 3, 0);
        assert_eq!(uxrom.cpu_read(0x8000), Some(3));
        assert_eq!(uxrom.cpu_read(0xC000), Some(7));
    }

    #[test]
    fn bank_select_wraps_modularly() {
        let mut uxrom = board(4);
        uxrom.cpu_write(0x8000, 9, 0);
        assert_eq!(uxrom.cpu_read(0x8000), Some(1));
    }
}
