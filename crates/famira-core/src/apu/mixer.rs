//! Non-linear mixer, stereo panning, and per-side DC blocking.

use serde::{Deserialize, Serialize};

/// Per-channel stereo weights. `1.0` on both sides is the hardware's mono
/// center; hosts can spread channels for a wider image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanSettings {
    pub pulse1: [f32; 2],
    pub pulse2: [f32; 2],
    pub triangle: [f32; 2],
    pub noise: [f32; 2],
    pub dmc: [f32; 2],
    pub expansion: [f32; 2],
}

impl Default for PanSettings {
    fn default() -> Self {
        let center = [1.0, 1.0];
        Self {
            pulse1: center,
            pulse2: center,
            triangle: center,
            noise: center,
            dmc: center,
            expansion: center,
        }
    }
}

/// One-pole high-pass filter removing the DAC's DC offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(super) struct DcBlocker {
    prev_input: f32,
    prev_output: f32,
}

impl DcBlocker {
    const R: f32 = 0.9957;

    pub(super) fn filter(&mut self, input: f32) -> f32 {
        let output = input - self.prev_input + Self::R * self.prev_output;
        self.prev_input = input;
        self.prev_output = output;
        output
    }
}

/// Channel levels for one CPU cycle, pre-mix.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ChannelLevels {
    pub(super) pulse1: u8,
    pub(super) pulse2: u8,
    pub(super) triangle: u8,
    pub(super) noise: u8,
    pub(super) dmc: u8,
    pub(super) expansion: f32,
}

/// The 2A03's non-linear DAC, modeled with the classic lookup tables built
/// at 1/16-step resolution so fractional pan sums still index cleanly.
#[derive(Debug, Clone)]
pub(super) struct Mixer {
    square_table: Vec<f32>,
    tnd_table: Vec<f32>,
    pub(super) pan: PanSettings,
    dc: [DcBlocker; 2],
}

impl Mixer {
    pub(super) fn new() -> Self {
        let mut square_table = vec![0.0f32; 31 * 16];
        for (i, entry) in square_table.iter_mut().enumerate().skip(1) {
            *entry = 95.52 / (8128.0 / (i as f32 / 16.0) + 100.0);
        }
        let mut tnd_table = vec![0.0f32; 203 * 16];
        for (i, entry) in tnd_table.iter_mut().enumerate().skip(1) {
            *entry = 163.67 / (24329.0 / (i as f32 / 16.0) + 100.0);
        }
        Self {
            square_table,
            tnd_table,
            pan: PanSettings::default(),
            dc: [DcBlocker::default(); 2],
        }
    }

    pub(super) fn reset(&mut self) {
        self.dc = [DcBlocker::default(); 2];
    }

    /// Mixes one stereo sample pair from the raw channel levels.
    pub(super) fn mix(&mut self, levels: ChannelLevels) -> (f32, f32) {
        let mut out = [0.0f32; 2];
        for (side, slot) in out.iter_mut().enumerate() {
            let square_sum = levels.pulse1 as f32 * self.pan.pulse1[side]
                + levels.pulse2 as f32 * self.pan.pulse2[side];
            let tnd_sum = 3.0 * levels.triangle as f32 * self.pan.triangle[side]
                + 2.0 * levels.noise as f32 * self.pan.noise[side]
                + levels.dmc as f32 * self.pan.dmc[side];

            let square_idx =
                ((square_sum * 16.0) as usize).min(self.square_table.len() - 1);
            let tnd_idx = ((tnd_sum * 16.0) as usize).min(self.tnd_table.len() - 1);

            let mixed = self.square_table[square_idx]
                + self.tnd_table[tnd_idx]
                + levels.expansion * self.pan.expansion[side];
            *slot = self.dc[side].filter(mixed).clamp(-1.0, 1.0);
        }
        (out[0], out[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_formula() {
        let mixer = Mixer::new();
        // square_table[n*16] must equal the documented formula at n.
        let n = 15.0f32;
        let expected = 95.52 / (8128.0 / n + 100.0);
        assert!((mixer.square_table[15 * 16] - expected).abs() < 1e-6);
        let m = 100.0f32;
        let expected = 163.67 / (24329.0 / m + 100.0);
        assert!((mixer.tnd_table[100 * 16] - expected).abs() < 1e-6);
    }

    #[test]
    fn silence_decays_to_zero() {
        let mut mixer = Mixer::new();
        let mut last = 0.0;
        for _ in 0..10_000 {
            let (l, _) = mixer.mix(ChannelLevels::default());
            last = l;
        }
        assert!(last.abs() < 1e-3);
    }

    #[test]
    fn output_stays_clamped() {
        let mut mixer = Mixer::new();
        let loud = ChannelLevels {
            pulse1: 15,
            pulse2: 15,
            triangle: 15,
            noise: 15,
            dmc: 127,
            expansion: 2.0,
        };
        for _ in 0..100 {
            let (l, r) = mixer.mix(loud);
            assert!((-1.0..=1.0).contains(&l));
            assert!((-1.0..=1.0).contains(&r));
        }
    }
}
