//! Property-style invariants over the public register/address helpers.

mod common;

use famira_core::cartridge::crc32;
use famira_core::cartridge::header::Mirroring;
use famira_core::ppu::palette::PaletteRam;
use famira_core::ppu::registers::VramRegisters;
use proptest::prelude::*;

proptest! {
    #[test]
    fn palette_sprite_aliases_mirror_background(slot in 0u16..4, value: u8) {
        let mut palette = PaletteRam::new();
        let sprite_alias = 0x3F10 + slot * 4;
        let background = 0x3F00 + slot * 4;
        palette.write(sprite_alias, value);
        prop_assert_eq!(palette.read(background), value);
        palette.write(background, value ^ 0xFF);
        prop_assert_eq!(palette.read(sprite_alias), value ^ 0xFF);
    }

    #[test]
    fn palette_mirrors_every_32_bytes(addr in 0x3F00u16..0x4000, value: u8) {
        let mut palette = PaletteRam::new();
        palette.write(addr, value);
        prop_assert_eq!(palette.read(0x3F00 + (addr & 0x1F)), value);
    }

    #[test]
    fn vram_address_stays_within_15_bits(v in 0u16..0x8000) {
        let mut regs = VramRegisters { v, t: 0, x: 0, w: false };
        regs.increment_y();
        prop_assert!(regs.v < 0x8000);
        regs.increment_x();
        prop_assert!(regs.v < 0x8000);
    }

    #[test]
    fn coarse_y_wrap_rules(coarse_y in 0u16..32, nametable in 0u16..4, fine_y in 0u16..8) {
        let v = (fine_y << 12) | (nametable << 10) | (coarse_y << 5);
        let mut regs = VramRegisters { v, t: 0, x: 0, w: false };
        regs.increment_y();
        if fine_y < 7 {
            // Only fine Y moves.
            prop_assert_eq!((regs.v >> 5) & 0x1F, coarse_y);
        } else {
            match coarse_y {
                29 => {
                    prop_assert_eq!((regs.v >> 5) & 0x1F, 0);
                    // Vertical nametable bit flips.
                    prop_assert_eq!((regs.v >> 11) & 1, ((v >> 11) & 1) ^ 1);
                }
                31 => {
                    prop_assert_eq!((regs.v >> 5) & 0x1F, 0);
                    prop_assert_eq!((regs.v >> 11) & 1, (v >> 11) & 1);
                }
                _ => prop_assert_eq!((regs.v >> 5) & 0x1F, coarse_y + 1),
            }
        }
    }

    #[test]
    fn scroll_write_pair_round_trips(x: u8, y in 0u8..240) {
        let mut regs = VramRegisters::default();
        regs.write_scroll(x);
        regs.write_scroll(y);
        prop_assert_eq!(regs.x, x & 7);
        prop_assert_eq!((regs.t & 0x1F) as u8, x >> 3);
        prop_assert_eq!(((regs.t >> 5) & 0x1F) as u8, y >> 3);
        prop_assert_eq!(((regs.t >> 12) & 0x7) as u8, y & 7);
        prop_assert!(!regs.w);
    }

    #[test]
    fn mirroring_resolution_is_in_bounds(addr in 0x2000u16..0x3000) {
        for mode in [
            Mirroring::Horizontal,
            Mirroring::Vertical,
            Mirroring::SingleScreenLower,
            Mirroring::SingleScreenUpper,
            Mirroring::FourScreen,
        ] {
            let index = mode.resolve(addr);
            prop_assert!(index < 0x1000);
            if mode != Mirroring::FourScreen {
                prop_assert!(index < 0x800);
            }
        }
    }

    #[test]
    fn vertical_mirroring_repeats_every_other_table(offset in 0u16..0x400) {
        prop_assert_eq!(
            Mirroring::Vertical.resolve(0x2000 + offset),
            Mirroring::Vertical.resolve(0x2800 + offset)
        );
        prop_assert_eq!(
            Mirroring::Horizontal.resolve(0x2000 + offset),
            Mirroring::Horizontal.resolve(0x2400 + offset)
        );
    }

    #[test]
    fn crc32_detects_single_bit_flips(data in proptest::collection::vec(any::<u8>(), 1..256), bit in 0usize..8, index_seed: u16) {
        let index = index_seed as usize % data.len();
        let mut flipped = data.clone();
        flipped[index] ^= 1 << bit;
        prop_assert_ne!(crc32(&data), crc32(&flipped));
        prop_assert_eq!(crc32(&data), crc32(&data.clone()));
    }
}
