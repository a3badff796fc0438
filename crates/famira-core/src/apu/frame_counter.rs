//! Frame sequencer: quarter- and half-frame clocks plus the frame IRQ.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub(super) enum FrameCounterMode {
    #[default]
    FourStep,
    FiveStep,
}

/// Which units to clock after a tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct FrameTick {
    pub(super) quarter: bool,
    pub(super) half: bool,
    pub(super) frame_irq: bool,
}

/// 4-step schedule: (CPU cycle, quarter, half, irq).
const FRAME_STEP_4: [(u16, bool, bool, bool); 4] = [
    (7457, true, false, false),
    (14913, true, true, false),
    (22371, true, false, false),
    (29829, true, true, true),
];
const FRAME_STEP_4_PERIOD: u16 = 29830;

/// 5-step schedule: no IRQ, one silent padding step.
const FRAME_STEP_5: [(u16, bool, bool, bool); 5] = [
    (7457, true, false, false),
    (14913, true, true, false),
    (22371, true, false, false),
    (29829, true, true, false),
    (37281, false, false, false),
];
const FRAME_STEP_5_PERIOD: u16 = 37282;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct FrameCounter {
    mode: FrameCounterMode,
    irq_inhibit: bool,
    cycle: u16,
    /// `$4017` writes land after a 3- or 4-cycle delay chosen by CPU cycle
    /// parity; the staged value waits here.
    pending_value: Option<u8>,
    pending_delay: u8,
}

impl FrameCounter {
    pub(super) fn irq_inhibited(&self) -> bool {
        self.irq_inhibit
    }

    /// Stages a `$4017` write. `odd_cycle` selects the 4-cycle variant.
    pub(super) fn write(&mut self, value: u8, odd_cycle: bool) {
        self.pending_value = Some(value);
        self.pending_delay = if odd_cycle { 4 } else { 3 };
    }

    fn apply(&mut self, value: u8) -> FrameTick {
        self.mode = if value & 0x80 == 0 {
            FrameCounterMode::FourStep
        } else {
            FrameCounterMode::FiveStep
        };
        self.irq_inhibit = value & 0x40 != 0;
        self.cycle = 0;
        // Switching into 5-step mode clocks both units immediately.
        if self.mode == FrameCounterMode::FiveStep {
            FrameTick {
                quarter: true,
                half: true,
                frame_irq: false,
            }
        } else {
            FrameTick::default()
        }
    }

    /// One CPU-cycle tick.
    pub(super) fn clock(&mut self) -> FrameTick {
        let mut tick = FrameTick::default();

        if let Some(value) = self.pending_value {
            if self.pending_delay == 0 {
                self.pending_value = None;
                let immediate = self.apply(value);
                tick.quarter |= immediate.quarter;
                tick.half |= immediate.half;
            } else {
                self.pending_delay -= 1;
            }
        }

        self.cycle = self.cycle.wrapping_add(1);
        let (schedule, period): (&[(u16, bool, bool, bool)], u16) = match self.mode {
            FrameCounterMode::FourStep => (&FRAME_STEP_4, FRAME_STEP_4_PERIOD),
            FrameCounterMode::FiveStep => (&FRAME_STEP_5, FRAME_STEP_5_PERIOD),
        };
        for &(step_cycle, quarter, half, irq) in schedule {
            if self.cycle == step_cycle {
                tick.quarter |= quarter;
                tick.half |= half;
                tick.frame_irq |= irq && !self.irq_inhibit;
            }
        }
        if self.cycle >= period {
            self.cycle = 0;
        }
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_step_schedule_fires_quarters_and_halves() {
        let mut fc = FrameCounter::default();
        let mut quarters = 0;
        let mut halves = 0;
        let mut irqs = 0;
        for _ in 0..FRAME_STEP_4_PERIOD {
            let tick = fc.clock();
            quarters += tick.quarter as u32;
            halves += tick.half as u32;
            irqs += tick.frame_irq as u32;
        }
        assert_eq!(quarters, 4);
        assert_eq!(halves, 2);
        assert_eq!(irqs, 1);
    }

    #[test]
    fn five_step_mode_change_clocks_immediately_after_delay() {
        let mut fc = FrameCounter::default();
        fc.write(0x80, false); // 3-cycle delay
        let mut first_tick = None;
        for cycle in 0..8 {
            let tick = fc.clock();
            if tick.quarter && first_tick.is_none() {
                first_tick = Some(cycle);
            }
        }
        assert_eq!(first_tick, Some(3));
    }

    #[test]
    fn inhibit_masks_frame_irq() {
        let mut fc = FrameCounter::default();
        fc.write(0x40, false);
        let mut irqs = 0;
        for _ in 0..(FRAME_STEP_4_PERIOD as u32 * 2) {
            irqs += fc.clock().frame_irq as u32;
        }
        assert_eq!(irqs, 0);
    }
}
