//! Cartridge image parsing and the mapper session it owns.

use std::fs;
use std::path::Path;

use crate::cartridge::header::{Header, Mirroring, NES_HEADER_LEN, TRAINER_LEN};
use crate::cartridge::mapper::{create_mapper, Mapper};
use crate::error::Error;
use crate::reset_kind::ResetKind;

pub mod header;
pub mod mapper;

/// A parsed cartridge plus the live board that serves its bus traffic.
///
/// ROM bytes are handed to the mapper at construction and are read-only for
/// the life of the session; only the board registers and its RAMs mutate.
#[derive(Debug, Clone)]
pub struct Cartridge {
    header: Header,
    checksum: u32,
    mapper: Box<dyn Mapper>,
}

impl Cartridge {
    /// Parses a cartridge from an in-memory iNES image.
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        let header = Header::parse(bytes)?;

        let mut cursor = NES_HEADER_LEN;
        let trainer = if header.trainer_present {
            let block = section(bytes, &mut cursor, TRAINER_LEN, "trainer")?;
            Some(block)
        } else {
            None
        };

        let prg_rom = section(bytes, &mut cursor, header.prg_rom_size, "PRG ROM")?;
        let chr_rom = section(bytes, &mut cursor, header.chr_rom_size, "CHR ROM")?;

        let checksum = crc32(bytes);
        let mapper = create_mapper(&header, prg_rom.to_vec(), chr_rom.to_vec(), trainer);

        Ok(Self {
            header,
            checksum,
            mapper,
        })
    }

    /// Loads and parses a cartridge directly from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let bytes = fs::read(path)?;
        Self::new(&bytes)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// CRC-32 over the full image, stored in save states for sanity checks.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    pub fn mapper_mut(&mut self) -> &mut dyn Mapper {
        self.mapper.as_mut()
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mapper.mirroring()
    }

    pub fn reset(&mut self, kind: ResetKind) {
        self.mapper.reset(kind);
    }
}

fn section<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
    name: &'static str,
) -> Result<&'a [u8], Error> {
    if len == 0 {
        return Ok(&[]);
    }
    let end = cursor.checked_add(len).ok_or(Error::SectionTooShort {
        section: name,
        expected: len,
        actual: bytes.len().saturating_sub(*cursor),
    })?;
    let slice = bytes.get(*cursor..end).ok_or(Error::SectionTooShort {
        section: name,
        expected: len,
        actual: bytes.len().saturating_sub(*cursor),
    })?;
    *cursor = end;
    Ok(slice)
}

/// 256-entry CRC-32 lookup table (IEEE polynomial), built at compile time.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
};

/// Table-driven CRC-32, computed once per load.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in bytes {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header(prg_banks: u8, chr_banks: u8, flags6: u8) -> Vec<u8> {
        vec![
            b'N', b'E', b'S', 0x1A, prg_banks, chr_banks, flags6, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ]
    }

    #[test]
    fn parses_basic_cartridge() {
        let mut rom = base_header(1, 1, 0);
        rom.extend(vec![0xAA; 16 * 1024]);
        rom.extend(vec![0x55; 8 * 1024]);

        let cartridge = Cartridge::new(&rom).expect("parse cartridge");
        assert_eq!(cartridge.header().prg_rom_size, 16 * 1024);
        assert_eq!(cartridge.header().chr_rom_size, 8 * 1024);
        assert_eq!(cartridge.mapper().mapper_id(), 0);
    }

    #[test]
    fn trainer_block_is_skipped_and_loaded() {
        let mut rom = base_header(1, 0, 0b0000_0100);
        rom.extend(vec![0xFE; 512]);
        rom.extend(vec![0xAA; 16 * 1024]);

        let mut cartridge = Cartridge::new(&rom).expect("parse cartridge");
        // Trainer content is visible at $7000 through the board's work RAM.
        assert_eq!(cartridge.mapper_mut().cpu_read(0x7000), Some(0xFE));
        assert_eq!(cartridge.mapper_mut().cpu_read(0x8000), Some(0xAA));
    }

    #[test]
    fn errors_when_prg_section_missing() {
        let mut rom = base_header(1, 0, 0);
        rom.extend(vec![0xAA; 1024]);

        let err = Cartridge::new(&rom).expect_err("should fail");
        assert!(matches!(
            err,
            Error::SectionTooShort {
                section: "PRG ROM",
                ..
            }
        ));
    }

    #[test]
    fn checksum_is_stable_and_known() {
        // CRC-32 of "123456789" is the classic check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn checksum_differs_between_images() {
        let mut rom_a = base_header(1, 0, 0);
        rom_a.extend(vec![0xAA; 16 * 1024]);
        let mut rom_b = rom_a.clone();
        rom_b[NES_HEADER_LEN] = 0xAB;
        assert_ne!(
            Cartridge::new(&rom_a).unwrap().checksum(),
            Cartridge::new(&rom_b).unwrap().checksum()
        );
    }
}
