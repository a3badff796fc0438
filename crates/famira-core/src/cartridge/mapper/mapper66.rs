//! Mapper 66 (GxROM).
//!
//! Single register: bits 4-5 select a 32 KiB PRG bank, bits 0-1 an 8 KiB
//! CHR bank.

use std::borrow::Cow;

use crate::cartridge::header::{Header, Mirroring};
use crate::cartridge::mapper::banks::{ChrMap, ChrStorage, PrgMap};
use crate::cartridge::mapper::{Mapper, MapperState, PpuFetchKind};
use crate::memory::cpu as cpu_mem;
use crate::reset_kind::ResetKind;

#[derive(Debug, Clone)]
pub struct Gxrom {
    prg_rom: Vec<u8>,
    chr: ChrStorage,
    prg_map: PrgMap,
    chr_map: ChrMap,
    mirroring: Mirroring,
    reg: u8,
}

impl Gxrom {
    pub fn new(
        header: &Header,
        prg_rom: Vec<u8>,
        chr_rom: Vec<u8>,
        _trainer: Option<&[u8]>,
    ) -> Self {
        let chr = ChrStorage::select(header, chr_rom);
        let chr_map = ChrMap::new(chr.len());
        let prg_map = PrgMap::new(prg_rom.len());
        Self {
            prg_rom,
            chr,
            prg_map,
            chr_map,
            mirroring: header.mirroring,
            reg: 0,
        }
    }

    fn apply(&mut self) {
        self.prg_map.set_32k(((self.reg >> 4) & 0x03) as isize);
        self.chr_map.set_8k((self.reg & 0x03) as isize);
    }
}

impl Mapper for Gxrom {
    fn reset(&mut self, kind: ResetKind) {
        if matches!(kind, ResetKind::PowerOn) {
            self.reg = 0;
            self.apply();
        }
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            cpu_mem::PRG_ROM_START..=cpu_mem::CPU_ADDR_END => {
                Some(self.prg_map.read(&self.prg_rom, addr))
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, data: u8, _instr: u64) {
        if addr >= cpu_mem::PRG_ROM_START {
            self.reg = data;
            self.apply();
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

    fn chr_ram(&self) -> Option<&[u8]> {
        self.chr.as_ram()
    }

    fn chr_ram_mut(&mut self) -> Option<&mut [u8]> {
        self.chr.as_ram_mut()
    }

    fn mapper_id(&self) -> u16 {
        66
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("GxROM")
    }

    fn save_state(&self) -> MapperState {
        MapperState::SingleRegister { reg: self.reg }
    }

    fn load_state(&mut self, state: &MapperState) {
        if let MapperState::SingleRegister { reg } = state {
            self.reg = *reg;
            self.apply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::RomFormat;

    fn board() -> Gxrom {
        let prg: Vec<u8> = (0..4u8).flat_map(|b| vec![b; 32 * 1024]).collect();
        let chr: Vec<u8> = (0..4u8).flat_map(|b| vec![b; 8 * 1024]).collect();
        let header = Header {
            format: RomFormat::INes,
            mapper: 66,
            mirroring: Mirroring::Horizontal,
            battery_backed_ram: false,
            trainer_present: false,
            prg_rom_size: prg.len(),
            chr_rom_size: chr.len(),
            chr_ram_size: 0,
            prg_ram_size: 8 * 1024,
        };
        Gxrom::new(&header, prg, chr, None)
    }

    #[test]
    fn bits_4_and_5_select_prg_bank() {
        let mut board = board();
        board.cpu_write(0x8000, 0x20, 0);
        assert_eq!(board.cpu_read(0x8000), Some(2));
        assert_eq!(board.cpu_read(0xFFFF), Some(2));
        // CHR stays on bank 0.
        assert_eq!(board.ppu_read(0x0000, PpuFetchKind::Background), Some(0));
    }

    #[test]
    fn bits_0_and_1_select_chr_bank() {
        let mut board = board();
        board.cpu_write(0x8000, 0x03, 0);
        assert_eq!(board.ppu_read(0x0000, PpuFetchKind::Background), Some(3));
        assert_eq!(board.ppu_read(0x1FFF, PpuFetchKind::Sprite), Some(3));
        assert_eq!(board.cpu_read(0x8000), Some(0));
    }

    #[test]
    fn both_banks_switch_from_one_write() {
        let mut board = board();
        board.cpu_write(0xC123, 0x31, 0);
        assert_eq!(board.cpu_read(0x8000), Some(3));
        assert_eq!(board.ppu_read(0x0000, PpuFetchKind::Data), Some(1));
    }

    #[test]
    fn power_on_reset_returns_to_bank_zero() {
        let mut board = board();
        board.cpu_write(0x8000, 0x33, 0);
        board.reset(ResetKind::PowerOn);
        assert_eq!(board.cpu_read(0x8000), Some(0));
        assert_eq!(board.ppu_read(0x0000, PpuFetchKind::Data), Some(0));
    }
}
