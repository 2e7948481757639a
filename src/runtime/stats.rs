use std::time::{Duration, Instant};

use crate::bytecode::op::Op;

/// Execution statistics collected while the VM runs. Backs `--performance`.
#[derive(Debug)]
pub struct ExecStats {
    pub instruction_count: u64,
    op_counts: [u64; 256],
    started: Option<Instant>,
    elapsed: Duration,
}

impl ExecStats {
    pub fn new() -> Self {
        ExecStats {
            instruction_count: 0,
            op_counts: [0; 256],
            started: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn start(&mut self) {
        self.instruction_count = 0;
        self.op_counts = [0; 256];
        self.elapsed = Duration::ZERO;
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed = started.elapsed();
        }
    }

    #[inline]
    pub fn record(&mut self, opcode: u8) {
        self.instruction_count += 1;
        self.op_counts[opcode as usize] += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn count_for(&self, op: Op) -> u64 {
        self.op_counts[op as u8 as usize]
    }

    /// Render the performance report: totals, throughput, per-opcode
    /// frequency sorted descending, and a memory summary.
    pub fn report(&self, const_count: usize, var_count: usize, stack_depth: usize) -> String {
        let mut lines = Vec::new();
        lines.push("=== performance report ===".to_string());
        lines.push(format!("total time: {:.4}s", self.elapsed.as_secs_f64()));
        lines.push(format!("instructions executed: {}", self.instruction_count));

        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            lines.push(format!(
                "average speed: {:.0} instructions/s",
                self.instruction_count as f64 / secs
            ));
        }

        lines.push("instruction counts:".to_string());
        let mut counts: Vec<(u8, u64)> = self
            .op_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(byte, count)| (byte as u8, *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (byte, count) in counts {
            let mnemonic = Op::from_u8(byte)
                .map(|op| op.mnemonic().to_string())
                .unwrap_or_else(|| format!("0x{:02X}", byte));
            let percent = (count as f64 / self.instruction_count.max(1) as f64) * 100.0;
            lines.push(format!("  {:<15}: {:>6}  ({:>5.1}%)", mnemonic, count, percent));
        }

        lines.push("memory:".to_string());
        lines.push(format!("  constant pool size: {}", const_count));
        lines.push(format!("  variables: {}", var_count));
        lines.push(format!("  final stack depth: {}", stack_depth));

        lines.join("\n")
    }
}

impl Default for ExecStats {
    fn default() -> Self {
        ExecStats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_instructions() {
        let mut stats = ExecStats::new();
        stats.start();
        stats.record(Op::LoadConst as u8);
        stats.record(Op::LoadConst as u8);
        stats.record(Op::Halt as u8);
        stats.stop();

        assert_eq!(stats.instruction_count, 3);
        assert_eq!(stats.count_for(Op::LoadConst), 2);
        assert_eq!(stats.count_for(Op::Halt), 1);
        assert_eq!(stats.count_for(Op::Add), 0);
    }

    #[test]
    fn test_start_resets_counts() {
        let mut stats = ExecStats::new();
        stats.start();
        stats.record(Op::Add as u8);
        stats.stop();
        stats.start();
        stats.stop();

        assert_eq!(stats.instruction_count, 0);
    }

    #[test]
    fn test_report_sorted_by_frequency() {
        let mut stats = ExecStats::new();
        stats.start();
        for _ in 0..3 {
            stats.record(Op::LoadVar as u8);
        }
        stats.record(Op::Print as u8);
        stats.stop();

        let report = stats.report(2, 1, 0);
        let load_pos = report.find("LOAD_VAR").unwrap();
        let print_pos = report.find("PRINT").unwrap();
        assert!(load_pos < print_pos);
        assert!(report.contains("instructions executed: 4"));
        assert!(report.contains("constant pool size: 2"));
    }
}
