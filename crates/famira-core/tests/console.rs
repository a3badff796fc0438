//! Whole-console scenarios driven through real 6502 programs.

mod common;

use common::{chr_with_solid_tile1, RomBuilder};
use famira_core::controller::Button;
use famira_core::Console;

fn console_with(rom: Vec<u8>) -> Console {
    let mut console = Console::new();
    console.load_rom(&rom).expect("load rom");
    console
}

#[test]
fn nrom_boot_runs_complete_frames() {
    // Reset target spins in place.
    let rom = RomBuilder::new(&[0x4C, 0x00, 0x80]).build();
    let mut console = console_with(rom);

    for frame in 1..=3u64 {
        console.run_frame();
        assert_eq!(console.frame_count(), frame);
        // Rendering stays off, so no odd-frame skip ever happens.
        assert_eq!(console.last_frame_dots(), 89_342);
    }
}

#[test]
fn documented_cycle_costs() {
    // LDA #$42 / STA $0200 / INC $10 / JMP self
    let rom = RomBuilder::new(&[
        0xA9, 0x42, // LDA #imm      2 cycles
        0x8D, 0x00, 0x02, // STA abs  4 cycles
        0xE6, 0x10, // INC zp        5 cycles
        0x4C, 0x07, 0x80, // JMP abs  3 cycles
    ])
    .build();
    let mut console = console_with(rom);

    let expected = [2u64, 4, 5, 3, 3];
    for &cycles in &expected {
        let before = console.cpu_cycles();
        console.step_instruction();
        assert_eq!(console.cpu_cycles() - before, cycles);
    }
}

#[test]
fn rendering_enables_odd_frame_skip() {
    // Keep rewriting CTRL/MASK so the writes land once warm-up ends.
    // NMI handler counts frames in $00.
    let rom = RomBuilder::new(&[
        0xA9, 0x90, // LDA #$90: NMI enable
        0x8D, 0x00, 0x20, // STA $2000
        0xA9, 0x1E, // LDA #$1E: show background + sprites
        0x8D, 0x01, 0x20, // STA $2001
        0x4C, 0x00, 0x80, // JMP $8000
    ])
    .patch_prg(0x20, &[0xE6, 0x00, 0x40]) // $8020: INC $00 / RTI
    .nmi_vector(0x8020)
    .build();
    let mut console = console_with(rom);

    for _ in 0..6 {
        console.run_frame();
    }
    // NMIs have been arriving once warm-up passed.
    assert!(console.peek_cpu(0x0000) >= 2);
    // With rendering on, consecutive frames pair one skipped and one full.
    let mut dots = Vec::new();
    for _ in 0..2 {
        console.run_frame();
        dots.push(console.last_frame_dots());
    }
    assert_eq!(dots[0] + dots[1], 89_342 + 89_341);
}

#[test]
fn open_bus_returns_last_data_byte() {
    // Write $42 to $2000, read unmapped $4100, store the result.
    let rom = RomBuilder::new(&[
        0xA9, 0x42, // LDA #$42
        0x8D, 0x00, 0x20, // STA $2000
        0xAD, 0x00, 0x41, // LDA $4100 (open bus)
        0x85, 0x10, // STA $10
        0x4C, 0x0A, 0x80, // JMP self
    ])
    .build();
    let mut console = console_with(rom);
    console.run_frame();
    assert_eq!(console.peek_cpu(0x0010), 0x42);
}

#[test]
fn ram_mirrors_every_2k() {
    let rom = RomBuilder::new(&[
        0xA9, 0x5A, // LDA #$5A
        0x85, 0x07, // STA $07
        0x4C, 0x04, 0x80, // JMP self
    ])
    .build();
    let mut console = console_with(rom);
    console.run_frame();
    for base in [0x0007u16, 0x0807, 0x1007, 0x1807] {
        assert_eq!(console.peek_cpu(base), 0x5A);
    }
}

#[test]
fn controller_serial_reads_through_program() {
    // Strobe, then shift nine bits into $20..$28.
    let rom = RomBuilder::new(&[
        0xA9, 0x01, // LDA #1
        0x8D, 0x16, 0x40, // STA $4016
        0xA9, 0x00, // LDA #0
        0x8D, 0x16, 0x40, // STA $4016
        0xA2, 0x00, // LDX #0
        // loop:
        0xAD, 0x16, 0x40, // LDA $4016
        0x29, 0x01, // AND #1
        0x95, 0x20, // STA $20,X
        0xE8, // INX
        0xE0, 0x09, // CPX #9
        0xD0, 0xF4, // BNE loop
        0x4C, 0x18, 0x80, // JMP self
    ])
    .build();
    let mut console = console_with(rom);
    console.button_down(0, Button::A);
    console.button_down(0, Button::Right);
    console.run_frame();

    let bits: Vec<u8> = (0..9).map(|i| console.peek_cpu(0x20 + i)).collect();
    assert_eq!(bits, vec![1, 0, 0, 0, 0, 0, 0, 1, 1]);
}

#[test]
fn dmc_fetch_lands_on_open_bus() {
    // Enable a one-byte DMC sample at $C000 (ROM filled with $7F), then
    // keep reading unmapped $5000.
    let rom = RomBuilder::new(&[
        0xA9, 0x00, // LDA #0
        0x8D, 0x12, 0x40, // STA $4012 (sample addr $C000)
        0x8D, 0x13, 0x40, // STA $4013 (length 1)
        0xA9, 0x10, // LDA #$10
        0x8D, 0x15, 0x40, // STA $4015 (enable DMC)
        // loop:
        0xAD, 0x00, 0x50, // LDA $5000 (open bus)
        0x85, 0x31, // STA $31
        0x4C, 0x0D, 0x80, // JMP loop
    ])
    .prg_fill(0x7F)
    .build();
    let mut console = console_with(rom);
    console.run_frame();
    assert_eq!(console.peek_cpu(0x0031), 0x7F);
}

#[test]
fn mmc3_scanline_counter_raises_irq() {
    // Program the MMC3 counter once, then keep rendering enabled; the IRQ
    // handler counts into $01.
    let rom = RomBuilder::new(&[
        0xA9, 0x0A, // LDA #10
        0x8D, 0x00, 0xC0, // STA $C000 (latch)
        0x8D, 0x01, 0xC0, // STA $C001 (reload)
        0x8D, 0x01, 0xE0, // STA $E001 (enable)
        0x58, // CLI
        // loop: rewrite PPU registers until warm-up lets them land
        0xA9, 0x1E, // LDA #$1E
        0x8D, 0x01, 0x20, // STA $2001
        0xA9, 0x08, // LDA #$08 (sprites at $1000)
        0x8D, 0x00, 0x20, // STA $2000
        0x4C, 0x0C, 0x80, // JMP loop ($800C)
    ])
    .mapper(4)
    .patch_prg(
        0x30,
        &[
            0xE6, 0x01, // INC $01
            0x8D, 0x00, 0xE0, // STA $E000 (ack)
            0x8D, 0x01, 0xE0, // STA $E001 (re-enable)
            0x40, // RTI
        ],
    )
    .irq_vector(0x8030)
    .build();
    let mut console = console_with(rom);

    for _ in 0..8 {
        console.run_frame();
    }
    assert!(
        console.peek_cpu(0x0001) >= 1,
        "MMC3 IRQ should have fired at least once"
    );
}

#[test]
fn sprite_zero_hit_observable_by_polling() {
    // Fill the nametable with solid tile 1, park sprite 0 at (100, 120),
    // then poll $2002 bit 6.
    let rom = RomBuilder::new(&[
        // Wait two vblanks so warm-up has passed.
        0xAD, 0x02, 0x20, // LDA $2002
        0x10, 0xFB, // BPL -5
        0xAD, 0x02, 0x20, // LDA $2002
        0x10, 0xFB, // BPL -5
        // Sprite 0 in the DMA page: Y=119, tile 1, attr 0, X=100.
        0xA9, 0x77, 0x8D, 0x00, 0x02, // LDA #119 / STA $0200
        0xA9, 0x01, 0x8D, 0x01, 0x02, // tile 1
        0xA9, 0x00, 0x8D, 0x02, 0x02, // attributes
        0xA9, 0x64, 0x8D, 0x03, 0x02, // X=100
        // Fill the nametable with tile 1 through $2006/$2007.
        0xA9, 0x20, 0x8D, 0x06, 0x20, // $2006 = $20
        0xA9, 0x00, 0x8D, 0x06, 0x20, // $2006 = $00
        0xA2, 0x00, // LDX #0
        0xA9, 0x01, // LDA #1
        // fill loop ($802C): four writes per iteration, 256 iterations
        0x8D, 0x07, 0x20, // STA $2007
        0x8D, 0x07, 0x20, // STA $2007
        0x8D, 0x07, 0x20, // STA $2007
        0x8D, 0x07, 0x20, // STA $2007
        0xE8, // INX
        0xD0, 0xF1, // BNE fill loop
        // OAM DMA from page 2.
        0xA9, 0x02, 0x8D, 0x14, 0x40, // LDA #2 / STA $4014
        // Enable rendering, 8x8 sprites, both tables at $0000.
        0xA9, 0x1E, 0x8D, 0x01, 0x20, // STA $2001
        0xA9, 0x00, 0x8D, 0x00, 0x20, // STA $2000
        // poll ($804A): wait for sprite-0 hit
        0xAD, 0x02, 0x20, // LDA $2002
        0x29, 0x40, // AND #$40
        0xF0, 0xF9, // BEQ poll
        0xA9, 0x01, 0x85, 0x40, // LDA #1 / STA $40
        0x4C, 0x55, 0x80, // JMP self
    ])
    .chr(&chr_with_solid_tile1())
    .build();
    let mut console = console_with(rom);

    for _ in 0..12 {
        console.run_frame();
    }
    assert_eq!(console.peek_cpu(0x0040), 1, "sprite-0 hit never observed");
}

#[test]
fn save_load_save_is_byte_identical() {
    let rom = RomBuilder::new(&[
        0xE6, 0x00, // INC $00
        0x4C, 0x00, 0x80, // JMP $8000
    ])
    .build();
    let mut console = console_with(rom);
    console.button_down(0, Button::Start);
    for _ in 0..3 {
        console.run_frame();
    }

    let first = console.save_state().expect("save");
    console.load_state(&first).expect("load");
    let second = console.save_state().expect("save again");
    assert_eq!(first, second);

    // The restored console keeps running deterministically.
    console.run_frame();
    let progress_a = console.peek_cpu(0x0000);
    console.load_state(&first).expect("reload");
    console.run_frame();
    let progress_b = console.peek_cpu(0x0000);
    assert_eq!(progress_a, progress_b);
}

#[test]
fn save_state_requires_cartridge() {
    let console_err = Console::new().save_state();
    assert!(console_err.is_err());
}

#[test]
fn bad_images_are_rejected_without_state_changes() {
    let mut console = Console::new();
    assert!(console.load_rom(b"not a rom").is_err());
    let mut truncated = RomBuilder::new(&[0x4C, 0x00, 0x80]).build();
    truncated.truncate(1024);
    assert!(console.load_rom(&truncated).is_err());
    assert!(console.cartridge().is_none());
}

#[test]
fn unknown_mapper_falls_back_to_nrom_and_boots() {
    let rom = RomBuilder::new(&[0x4C, 0x00, 0x80]).mapper(151).build();
    let mut console = console_with(rom);
    console.run_frame();
    assert_eq!(console.cartridge().unwrap().mapper().mapper_id(), 0);
}
