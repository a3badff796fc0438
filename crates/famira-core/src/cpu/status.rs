use bitflags::bitflags;

bitflags! {
    /// 6502 processor status register (NV-BDIZC).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        const CARRY     = 0b0000_0001;
        const ZERO      = 0b0000_0010;
        const INTERRUPT = 0b0000_0100;
        /// Decimal mode flag; settable but ignored by the NES ALU.
        const DECIMAL   = 0b0000_1000;
        /// Only exists on the stack: set by PHP/BRK pushes, clear on IRQ/NMI.
        const BREAK     = 0b0001_0000;
        /// Bit 5 reads back as 1.
        const UNUSED    = 0b0010_0000;
        const OVERFLOW  = 0b0100_0000;
        const NEGATIVE  = 0b1000_0000;
    }
}

impl Status {
    /// Updates Z and N from a result byte.
    #[inline]
    pub fn set_zn(&mut self, value: u8) {
        self.set(Status::ZERO, value == 0);
        self.set(Status::NEGATIVE, value & 0x80 != 0);
    }
}
