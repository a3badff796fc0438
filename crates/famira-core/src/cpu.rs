//! 6502 CPU core.
//!
//! `step` executes exactly one instruction and returns its full cycle cost,
//! including page-cross and branch penalties and any OAM DMA stall it
//! triggered. Every cycle of an instruction is modeled as one bus access
//! (real 6502 behavior), so the bus can advance the PPU to the exact
//! intra-instruction dot before any timing-sensitive access, and the
//! open-bus latch tracks every byte that moves.
//!
//! Unofficial opcodes are a declared gap: they execute as NOPs with the
//! documented cycle cost of their addressing shape, logged once each.

use tracing::warn;

use crate::bus::CpuBus;
use crate::cpu::lookup::{Instruction, Mnemonic, Mode, OPCODES};
use crate::cpu::status::Status;
use crate::memory::cpu as cpu_mem;
use crate::memory::ppu::Register as PpuRegister;
use crate::reset_kind::ResetKind;

pub mod lookup;
pub mod status;

/// Memory access class, used by address resolution to decide whether the
/// documented dummy read of the unfixed address must happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Rmw,
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) s: u8,
    pub(crate) p: Status,
    pub(crate) pc: u16,
    /// Last byte seen on the data bus; substituted for undecoded reads.
    pub(crate) open_bus: u8,
    /// Bitset of unofficial opcodes already logged.
    warned: [u64; 4],
}

/// Register snapshot for tracing and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
}

impl Cpu {
    pub(crate) fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0xFD,
            p: Status::from_bits_truncate(0x34),
            pc: 0,
            open_bus: 0,
            warned: [0; 4],
        }
    }

    /// Loads the reset vector and applies register init for the reset kind.
    pub(crate) fn reset(&mut self, bus: &mut CpuBus<'_>, kind: ResetKind) {
        match kind {
            ResetKind::PowerOn => {
                self.a = 0;
                self.x = 0;
                self.y = 0;
                self.s = 0xFD;
                self.p = Status::from_bits_truncate(0x34);
                self.open_bus = 0;
            }
            ResetKind::Soft => {
                self.p.insert(Status::INTERRUPT);
                self.s = self.s.wrapping_sub(3);
            }
        }
        let lo = bus.read(cpu_mem::RESET_VECTOR).unwrap_or(0);
        let hi = bus.read(cpu_mem::RESET_VECTOR + 1).unwrap_or(0);
        self.pc = u16::from_le_bytes([lo, hi]);
    }

    pub(crate) fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            pc: self.pc,
            a: self.a,
            x: self.x,
            y: self.y,
            s: self.s,
            p: self.p.bits(),
        }
    }

    // ---- bus access primitives -------------------------------------------

    /// Data read: the transferred byte lands on the open-bus latch.
    fn read(&mut self, bus: &mut CpuBus<'_>, addr: u16) -> u8 {
        let value = bus.read(addr).unwrap_or(self.open_bus);
        self.open_bus = value;
        value
    }

    /// Instruction-stream or dummy read: consumes the cycle and observes
    /// the bus without moving the latch. Keeping fetches off the latch is
    /// what lets `LDA $4100` after `STA $2000` read back `$42` instead of
    /// its own operand byte.
    fn peek(&mut self, bus: &mut CpuBus<'_>, addr: u16) -> u8 {
        bus.read(addr).unwrap_or(self.open_bus)
    }

    fn write(&mut self, bus: &mut CpuBus<'_>, addr: u16, data: u8) {
        bus.write(addr, data);
        self.open_bus = data;
    }

    /// Internal cycle with no externally visible bus traffic.
    fn tick(&mut self, bus: &mut CpuBus<'_>) {
        bus.tick();
    }

    fn fetch(&mut self, bus: &mut CpuBus<'_>) -> u8 {
        let value = self.peek(bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn push(&mut self, bus: &mut CpuBus<'_>, data: u8) {
        self.write(bus, cpu_mem::STACK_PAGE | self.s as u16, data);
        self.s = self.s.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut CpuBus<'_>) -> u8 {
        self.s = self.s.wrapping_add(1);
        self.read(bus, cpu_mem::STACK_PAGE | self.s as u16)
    }

    // ---- address resolution ----------------------------------------------

    fn resolve(&mut self, bus: &mut CpuBus<'_>, mode: Mode, access: Access) -> u16 {
        match mode {
            Mode::Imm => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                addr
            }
            Mode::Zp => self.fetch(bus) as u16,
            Mode::Zpx => {
                let base = self.fetch(bus);
                // Dummy read of the unindexed zero-page address.
                self.peek(bus, base as u16);
                base.wrapping_add(self.x) as u16
            }
            Mode::Zpy => {
                let base = self.fetch(bus);
                self.peek(bus, base as u16);
                base.wrapping_add(self.y) as u16
            }
            Mode::Abs => {
                let lo = self.fetch(bus);
                let hi = self.fetch(bus);
                u16::from_le_bytes([lo, hi])
            }
            Mode::Abx => self.indexed_absolute(bus, self.x, access),
            Mode::Aby => self.indexed_absolute(bus, self.y, access),
            Mode::Izx => {
                let ptr = self.fetch(bus);
                self.peek(bus, ptr as u16);
                let ptr = ptr.wrapping_add(self.x);
                let lo = self.peek(bus, ptr as u16);
                let hi = self.peek(bus, ptr.wrapping_add(1) as u16);
                u16::from_le_bytes([lo, hi])
            }
            Mode::Izy => {
                let ptr = self.fetch(bus);
                let lo = self.peek(bus, ptr as u16);
                let hi = self.peek(bus, ptr.wrapping_add(1) as u16);
                let base = u16::from_le_bytes([lo, hi]);
                let addr = base.wrapping_add(self.y as u16);
                self.index_penalty(bus, base, addr, access);
                addr
            }
            Mode::Imp | Mode::Acc | Mode::Ind | Mode::Rel => {
                unreachable!("mode {mode:?} resolved inline")
            }
        }
    }

    fn indexed_absolute(&mut self, bus: &mut CpuBus<'_>, index: u8, access: Access) -> u16 {
        let lo = self.fetch(bus);
        let hi = self.fetch(bus);
        let base = u16::from_le_bytes([lo, hi]);
        let addr = base.wrapping_add(index as u16);
        self.index_penalty(bus, base, addr, access);
        addr
    }

    /// Performs the dummy read of the unfixed address when an index
    /// crossed a page, or unconditionally for writes and RMW targets.
    fn index_penalty(&mut self, bus: &mut CpuBus<'_>, base: u16, addr: u16, access: Access) {
        let crossed = base & 0xFF00 != addr & 0xFF00;
        if access != Access::Read || crossed {
            let unfixed = (base & 0xFF00) | (addr & 0x00FF);
            self.peek(bus, unfixed);
        }
    }

    // ---- execution -------------------------------------------------------

    /// Executes one instruction (or a pending interrupt) and returns its
    /// cycle count, including penalties and DMA stalls.
    pub(crate) fn step(&mut self, bus: &mut CpuBus<'_>) -> u32 {
        bus.begin_instruction();

        // Interrupt dispatch order at the boundary: NMI before IRQ; RESET is
        // driven externally through `reset`.
        if bus.take_nmi() {
            self.interrupt(bus, cpu_mem::NMI_VECTOR);
            return bus.cycles_this_instr();
        }
        if bus.irq_level() && !self.p.contains(Status::INTERRUPT) {
            self.interrupt(bus, cpu_mem::IRQ_VECTOR);
            return bus.cycles_this_instr();
        }

        let opcode = self.fetch(bus);
        let instr = OPCODES[opcode as usize];
        self.exec(bus, opcode, instr);

        // OAM DMA triggered by a $4014 write is appended to the write
        // instruction: a dummy cycle, an alignment cycle on odd parity, and
        // 256 read/write pairs that all travel the normal CPU bus.
        if let Some(page) = bus.take_oam_dma() {
            self.tick(bus);
            if bus.total_cycles() & 1 == 1 {
                self.tick(bus);
            }
            for offset in 0u16..256 {
                let value = self.read(bus, (page as u16) << 8 | offset);
                self.write(bus, PpuRegister::OamData.addr(), value);
            }
        }

        bus.cycles_this_instr()
    }

    fn exec(&mut self, bus: &mut CpuBus<'_>, opcode: u8, instr: Instruction) {
        use Mnemonic::*;

        match instr.mnemonic {
            // Loads / stores ------------------------------------------------
            Lda => {
                let v = self.load(bus, instr.mode);
                self.a = v;
                self.p.set_zn(v);
            }
            Ldx => {
                let v = self.load(bus, instr.mode);
                self.x = v;
                self.p.set_zn(v);
            }
            Ldy => {
                let v = self.load(bus, instr.mode);
                self.y = v;
                self.p.set_zn(v);
            }
            Sta => {
                let addr = self.resolve(bus, instr.mode, Access::Write);
                self.write(bus, addr, self.a);
            }
            Stx => {
                let addr = self.resolve(bus, instr.mode, Access::Write);
                self.write(bus, addr, self.x);
            }
            Sty => {
                let addr = self.resolve(bus, instr.mode, Access::Write);
                self.write(bus, addr, self.y);
            }

            // Arithmetic ----------------------------------------------------
            Adc => {
                let v = self.load(bus, instr.mode);
                self.adc(v);
            }
            Sbc => {
                let v = self.load(bus, instr.mode);
                self.adc(!v);
            }
            Cmp => {
                let v = self.load(bus, instr.mode);
                self.compare(self.a, v);
            }
            Cpx => {
                let v = self.load(bus, instr.mode);
                self.compare(self.x, v);
            }
            Cpy => {
                let v = self.load(bus, instr.mode);
                self.compare(self.y, v);
            }

            // Logic ---------------------------------------------------------
            And => {
                let v = self.load(bus, instr.mode);
                self.a &= v;
                self.p.set_zn(self.a);
            }
            Ora => {
                let v = self.load(bus, instr.mode);
                self.a |= v;
                self.p.set_zn(self.a);
            }
            Eor => {
                let v = self.load(bus, instr.mode);
                self.a ^= v;
                self.p.set_zn(self.a);
            }
            Bit => {
                let v = self.load(bus, instr.mode);
                self.p.set(Status::ZERO, self.a & v == 0);
                self.p.set(Status::NEGATIVE, v & 0x80 != 0);
                self.p.set(Status::OVERFLOW, v & 0x40 != 0);
            }

            // Shifts / rotates (read-modify-write) --------------------------
            Asl => self.modify(bus, instr.mode, |p, v| {
                p.set(Status::CARRY, v & 0x80 != 0);
                v << 1
            }),
            Lsr => self.modify(bus, instr.mode, |p, v| {
                p.set(Status::CARRY, v & 0x01 != 0);
                v >> 1
            }),
            Rol => self.modify(bus, instr.mode, |p, v| {
                let carry_in = p.contains(Status::CARRY) as u8;
                p.set(Status::CARRY, v & 0x80 != 0);
                (v << 1) | carry_in
            }),
            Ror => self.modify(bus, instr.mode, |p, v| {
                let carry_in = (p.contains(Status::CARRY) as u8) << 7;
                p.set(Status::CARRY, v & 0x01 != 0);
                (v >> 1) | carry_in
            }),
            Inc => self.modify(bus, instr.mode, |p, v| {
                let r = v.wrapping_add(1);
                p.set_zn(r);
                r
            }),
            Dec => self.modify(bus, instr.mode, |p, v| {
                let r = v.wrapping_sub(1);
                p.set_zn(r);
                r
            }),

            // Register transfers and increments -----------------------------
            Tax => self.implied(bus, |cpu| {
                cpu.x = cpu.a;
                cpu.p.set_zn(cpu.x);
            }),
            Tay => self.implied(bus, |cpu| {
                cpu.y = cpu.a;
                cpu.p.set_zn(cpu.y);
            }),
            Txa => self.implied(bus, |cpu| {
                cpu.a = cpu.x;
                cpu.p.set_zn(cpu.a);
            }),
            Tya => self.implied(bus, |cpu| {
                cpu.a = cpu.y;
                cpu.p.set_zn(cpu.a);
            }),
            Tsx => self.implied(bus, |cpu| {
                cpu.x = cpu.s;
                cpu.p.set_zn(cpu.x);
            }),
            Txs => self.implied(bus, |cpu| {
                cpu.s = cpu.x;
            }),
            Inx => self.implied(bus, |cpu| {
                cpu.x = cpu.x.wrapping_add(1);
                cpu.p.set_zn(cpu.x);
            }),
            Iny => self.implied(bus, |cpu| {
                cpu.y = cpu.y.wrapping_add(1);
                cpu.p.set_zn(cpu.y);
            }),
            Dex => self.implied(bus, |cpu| {
                cpu.x = cpu.x.wrapping_sub(1);
                cpu.p.set_zn(cpu.x);
            }),
            Dey => self.implied(bus, |cpu| {
                cpu.y = cpu.y.wrapping_sub(1);
                cpu.p.set_zn(cpu.y);
            }),

            // Flag operations -----------------------------------------------
            Clc => self.implied(bus, |cpu| cpu.p.remove(Status::CARRY)),
            Sec => self.implied(bus, |cpu| cpu.p.insert(Status::CARRY)),
            Cli => self.implied(bus, |cpu| cpu.p.remove(Status::INTERRUPT)),
            Sei => self.implied(bus, |cpu| cpu.p.insert(Status::INTERRUPT)),
            Clv => self.implied(bus, |cpu| cpu.p.remove(Status::OVERFLOW)),
            Cld => self.implied(bus, |cpu| cpu.p.remove(Status::DECIMAL)),
            Sed => self.implied(bus, |cpu| cpu.p.insert(Status::DECIMAL)),
            Nop => self.implied(bus, |_| {}),

            // Stack ---------------------------------------------------------
            Pha => {
                self.peek(bus, self.pc);
                self.push(bus, self.a);
            }
            Php => {
                self.peek(bus, self.pc);
                let pushed = self.p | Status::BREAK | Status::UNUSED;
                self.push(bus, pushed.bits());
            }
            Pla => {
                self.peek(bus, self.pc);
                self.tick(bus);
                self.a = self.pull(bus);
                self.p.set_zn(self.a);
            }
            Plp => {
                self.peek(bus, self.pc);
                self.tick(bus);
                let bits = self.pull(bus);
                self.p = Status::from_bits_truncate(bits) | Status::UNUSED;
                self.p.remove(Status::BREAK);
            }

            // Control flow --------------------------------------------------
            Jmp => match instr.mode {
                Mode::Abs => {
                    let lo = self.fetch(bus);
                    let hi = self.fetch(bus);
                    self.pc = u16::from_le_bytes([lo, hi]);
                }
                _ => {
                    // JMP (indirect) with the documented page-wrap bug: the
                    // high pointer byte comes from the same page.
                    let lo = self.fetch(bus);
                    let hi = self.fetch(bus);
                    let ptr = u16::from_le_bytes([lo, hi]);
                    let target_lo = self.peek(bus, ptr);
                    let wrapped = (ptr & 0xFF00) | ((ptr.wrapping_add(1)) & 0x00FF);
                    let target_hi = self.peek(bus, wrapped);
                    self.pc = u16::from_le_bytes([target_lo, target_hi]);
                }
            },
            Jsr => {
                let lo = self.fetch(bus);
                self.tick(bus);
                let ret = self.pc; // points at the high operand byte
                self.push(bus, (ret >> 8) as u8);
                self.push(bus, ret as u8);
                let hi = self.fetch(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            Rts => {
                self.peek(bus, self.pc);
                self.tick(bus);
                let lo = self.pull(bus);
                let hi = self.pull(bus);
                self.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
                self.tick(bus);
            }
            Rti => {
                self.peek(bus, self.pc);
                self.tick(bus);
                let bits = self.pull(bus);
                self.p = Status::from_bits_truncate(bits) | Status::UNUSED;
                self.p.remove(Status::BREAK);
                let lo = self.pull(bus);
                let hi = self.pull(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            Brk => {
                // BRK consumes a padding byte and pushes B set.
                self.fetch(bus);
                let pc = self.pc;
                self.push(bus, (pc >> 8) as u8);
                self.push(bus, pc as u8);
                let pushed = self.p | Status::BREAK | Status::UNUSED;
                self.push(bus, pushed.bits());
                self.p.insert(Status::INTERRUPT);
                let lo = self.read(bus, cpu_mem::IRQ_VECTOR);
                let hi = self.read(bus, cpu_mem::IRQ_VECTOR + 1);
                self.pc = u16::from_le_bytes([lo, hi]);
            }

            Bpl => self.branch(bus, !self.p.contains(Status::NEGATIVE)),
            Bmi => self.branch(bus, self.p.contains(Status::NEGATIVE)),
            Bvc => self.branch(bus, !self.p.contains(Status::OVERFLOW)),
            Bvs => self.branch(bus, self.p.contains(Status::OVERFLOW)),
            Bcc => self.branch(bus, !self.p.contains(Status::CARRY)),
            Bcs => self.branch(bus, self.p.contains(Status::CARRY)),
            Bne => self.branch(bus, !self.p.contains(Status::ZERO)),
            Beq => self.branch(bus, self.p.contains(Status::ZERO)),

            // Unofficial opcodes: NOP of the same shape ---------------------
            Ill => {
                self.warn_unofficial(opcode);
                self.pc = self.pc.wrapping_add(instr.mode.operand_len());
                while bus.cycles_this_instr() < instr.cycles as u32 {
                    self.tick(bus);
                }
            }
        }
    }

    /// Resolves a read operand and fetches it.
    fn load(&mut self, bus: &mut CpuBus<'_>, mode: Mode) -> u8 {
        let addr = self.resolve(bus, mode, Access::Read);
        self.read(bus, addr)
    }

    /// Shared implied-mode shape: dummy read of the next opcode byte.
    fn implied<F: FnOnce(&mut Self)>(&mut self, bus: &mut CpuBus<'_>, f: F) {
        self.peek(bus, self.pc);
        f(self);
    }

    /// Read-modify-write shape: the original value is written back before
    /// the modified value.
    fn modify<F>(&mut self, bus: &mut CpuBus<'_>, mode: Mode, f: F)
    where
        F: FnOnce(&mut Status, u8) -> u8,
    {
        if mode == Mode::Acc {
            self.peek(bus, self.pc);
            self.a = f(&mut self.p, self.a);
            self.p.set_zn(self.a);
            return;
        }
        let addr = self.resolve(bus, mode, Access::Rmw);
        let value = self.read(bus, addr);
        self.write(bus, addr, value);
        let result = f(&mut self.p, value);
        self.write(bus, addr, result);
        self.p.set_zn(result);
    }

    fn branch(&mut self, bus: &mut CpuBus<'_>, taken: bool) {
        let offset = self.fetch(bus) as i8;
        if taken {
            self.tick(bus);
            let target = self.pc.wrapping_add(offset as u16);
            if target & 0xFF00 != self.pc & 0xFF00 {
                self.tick(bus);
            }
            self.pc = target;
        }
    }

    fn adc(&mut self, value: u8) {
        let carry = self.p.contains(Status::CARRY) as u16;
        let sum = self.a as u16 + value as u16 + carry;
        let result = sum as u8;
        self.p.set(Status::CARRY, sum > 0xFF);
        self.p
            .set(Status::OVERFLOW, (self.a ^ result) & (value ^ result) & 0x80 != 0);
        self.a = result;
        self.p.set_zn(result);
    }

    fn compare(&mut self, reg: u8, value: u8) {
        let result = reg.wrapping_sub(value);
        self.p.set(Status::CARRY, reg >= value);
        self.p.set_zn(result);
    }

    fn interrupt(&mut self, bus: &mut CpuBus<'_>, vector: u16) {
        self.peek(bus, self.pc);
        self.peek(bus, self.pc);
        let pc = self.pc;
        self.push(bus, (pc >> 8) as u8);
        self.push(bus, pc as u8);
        let pushed = (self.p | Status::UNUSED) - Status::BREAK;
        self.push(bus, pushed.bits());
        self.p.insert(Status::INTERRUPT);
        let lo = self.read(bus, vector);
        let hi = self.read(bus, vector + 1);
        self.pc = u16::from_le_bytes([lo, hi]);
    }

    fn warn_unofficial(&mut self, opcode: u8) {
        let word = (opcode >> 6) as usize;
        let bit = 1u64 << (opcode & 0x3F);
        if self.warned[word] & bit == 0 {
            self.warned[word] |= bit;
            warn!("unofficial opcode {opcode:02X} executed as NOP");
        }
    }
}
