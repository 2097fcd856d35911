//! Gas metering behavior
//!
//! Three metering behaviors are selectable per environment:
//! - **Default**: standard accounting; frame totals only.
//! - **NoMetering**: per-step accounting is skipped entirely. Execution
//!   still charges gas inside revm, but the inspector does no bookkeeping,
//!   which is the cheap mode for bulk test runs.
//! - **Profiling**: like default, plus per-PC used/refunded maps on every
//!   frame, which is what the line/function profiler folds.

use std::collections::BTreeMap;

/// Which gas accounting behavior executions run with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GasMeterMode {
    /// Standard accounting, frame totals only
    #[default]
    Default,
    /// Skip per-step gas bookkeeping
    NoMetering,
    /// Track gas used and refunded per PC
    Profiling,
}

/// Per-PC gas figures for one computation frame
///
/// `gas_used_of[pc]` accumulates every charge made while `pc` was executing
/// (including the full cost of a call opcode; the profiler backs child gas
/// out later). `gas_refunded_of[pc]` accumulates refund deltas the same way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PcGasProfile {
    pub gas_used_of: BTreeMap<usize, i64>,
    pub gas_refunded_of: BTreeMap<usize, i64>,
}

impl PcGasProfile {
    /// Record a gas charge attributed to `pc`
    pub fn charge(&mut self, pc: usize, amount: i64) {
        *self.gas_used_of.entry(pc).or_default() += amount;
    }

    /// Record a refund attributed to `pc`
    pub fn refund(&mut self, pc: usize, amount: i64) {
        *self.gas_refunded_of.entry(pc).or_default() += amount;
    }

    /// Ensure `pc` appears in the profile even with zero cost
    ///
    /// Terminating opcodes (STOP, RETURN, REVERT) may charge nothing but
    /// still need line attribution.
    pub fn touch(&mut self, pc: usize) {
        self.gas_used_of.entry(pc).or_default();
    }

    /// Total gas used across all PCs
    pub fn total_used(&self) -> i64 {
        self.gas_used_of.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_per_pc() {
        let mut profile = PcGasProfile::default();
        profile.charge(0, 3);
        profile.charge(0, 2);
        profile.charge(7, 10);
        profile.refund(7, 4);
        assert_eq!(profile.gas_used_of[&0], 5);
        assert_eq!(profile.gas_used_of[&7], 10);
        assert_eq!(profile.gas_refunded_of[&7], 4);
        assert_eq!(profile.total_used(), 15);
    }

    #[test]
    fn test_touch_zero_fills() {
        let mut profile = PcGasProfile::default();
        profile.touch(42);
        assert_eq!(profile.gas_used_of[&42], 0);
    }
}
