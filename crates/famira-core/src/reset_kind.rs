/// Distinguishes a cold boot from a console reset-button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Full power cycle: RAM is refilled, every component reinitializes.
    PowerOn,
    /// Warm reset: CPU RAM and A/X/Y survive, I is set, S drops by 3.
    Soft,
}
