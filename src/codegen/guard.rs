//! Compilation guard: detects degenerate lowering behavior before it hangs
//! or exhausts memory.
//!
//! Three independent detectors run over the lowering pass: per-block visit
//! counts, per-statement processing counts, and a fingerprint history over
//! generated instructions that catches both long runs of identical
//! instructions and short repeating patterns. Any trip is fatal to the
//! current compilation unit.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use crate::diagnostics::CodegenError;
use crate::mir::BlockId;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Maximum times a single basic block may be entered while lowering one
    /// function.
    pub max_block_visits: usize,
    /// Maximum times a single MIR statement node may be processed.
    pub max_statement_visits: usize,
    /// Maximum instructions generated for one basic block.
    pub max_block_instructions: usize,
    /// Maximum run of consecutive identical instruction fingerprints.
    pub max_consecutive_duplicates: usize,
    /// Fingerprint history retained for periodic-pattern detection.
    pub history_cap: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            max_block_visits: 100_000,
            max_statement_visits: 10_000,
            max_block_instructions: 1_000_000,
            max_consecutive_duplicates: 64,
            history_cap: 100,
        }
    }
}

/// Periods checked by the pattern detector.
const PATTERN_PERIODS: std::ops::RangeInclusive<usize> = 2..=10;
/// A pattern must repeat this many times in a row to count as a loop.
const PATTERN_REPEATS: usize = 3;

#[derive(Debug)]
pub struct CompilationGuard {
    config: GuardConfig,
    block_visits: HashMap<(String, BlockId), usize>,
    block_instructions: HashMap<(String, BlockId), usize>,
    statement_visits: HashMap<usize, usize>,
    history: VecDeque<u64>,
    last_fingerprint: Option<u64>,
    consecutive: usize,
    current: Option<(String, BlockId)>,
}

impl Default for CompilationGuard {
    fn default() -> Self {
        CompilationGuard::new()
    }
}

impl CompilationGuard {
    pub fn new() -> Self {
        CompilationGuard::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        CompilationGuard {
            config,
            block_visits: HashMap::new(),
            block_instructions: HashMap::new(),
            statement_visits: HashMap::new(),
            history: VecDeque::new(),
            last_fingerprint: None,
            consecutive: 0,
            current: None,
        }
    }

    /// Clears all counters for a new compilation unit.
    pub fn reset(&mut self) {
        self.block_visits.clear();
        self.block_instructions.clear();
        self.statement_visits.clear();
        self.history.clear();
        self.last_fingerprint = None;
        self.consecutive = 0;
        self.current = None;
    }

    pub fn begin_function(&mut self, name: &str) {
        log::debug!(target: "codegen::func", "lowering function `{}`", name);
        self.current = Some((name.to_string(), 0));
    }

    /// Records entry into a basic block and trips past the visit threshold.
    pub fn enter_block(&mut self, function: &str, block: BlockId) -> Result<(), CodegenError> {
        let key = (function.to_string(), block);
        let entry = self.block_visits.entry(key).or_insert(0);
        *entry += 1;
        let visits = *entry;
        self.current = Some((function.to_string(), block));
        if visits > self.config.max_block_visits {
            return Err(CodegenError::guard(
                function,
                block,
                format!(
                    "infinite loop detected: bb{} entered {} times (limit {});\n{}",
                    block,
                    visits,
                    self.config.max_block_visits,
                    self.statistics()
                ),
            ));
        }
        Ok(())
    }

    /// Records one processing pass over a statement node, keyed by node
    /// identity.
    pub fn note_statement(&mut self, node: usize) -> Result<(), CodegenError> {
        let entry = self.statement_visits.entry(node).or_insert(0);
        *entry += 1;
        let visits = *entry;
        if visits > self.config.max_statement_visits {
            let (function, block) = self.location();
            return Err(CodegenError::guard(
                function,
                block,
                format!(
                    "infinite loop detected: one statement processed {} times (limit {})",
                    visits, self.config.max_statement_visits
                ),
            ));
        }
        Ok(())
    }

    /// Records a generated-instruction fingerprint and runs duplicate and
    /// periodic-pattern detection over the trailing window.
    pub fn record_instruction(&mut self, fingerprint: &str) -> Result<(), CodegenError> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        let fp = hasher.finish();

        if let Some((func, block)) = self.current.clone() {
            let entry = self.block_instructions.entry((func.clone(), block)).or_insert(0);
            *entry += 1;
            let count = *entry;
            if count > self.config.max_block_instructions {
                return Err(CodegenError::guard(
                    func,
                    block,
                    format!(
                        "infinite loop detected: {} instructions generated in one block (limit {})",
                        count, self.config.max_block_instructions
                    ),
                ));
            }
        }

        if self.last_fingerprint == Some(fp) {
            self.consecutive += 1;
        } else {
            self.consecutive = 1;
            self.last_fingerprint = Some(fp);
        }
        if self.consecutive > self.config.max_consecutive_duplicates {
            let (function, block) = self.location();
            return Err(CodegenError::guard(
                function,
                block,
                format!(
                    "infinite loop detected: identical instruction repeated {} times",
                    self.consecutive
                ),
            ));
        }

        self.history.push_back(fp);
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
        if self.detect_periodic_pattern() {
            let (function, block) = self.location();
            return Err(CodegenError::guard(
                function,
                block,
                format!(
                    "infinite loop detected: periodic instruction pattern in trailing window;\n{}",
                    self.statistics()
                ),
            ));
        }
        Ok(())
    }

    /// True when the last `PATTERN_REPEATS` windows of some period are all
    /// identical.
    fn detect_periodic_pattern(&self) -> bool {
        let hist = &self.history;
        for period in PATTERN_PERIODS {
            let needed = period * PATTERN_REPEATS;
            if hist.len() < needed {
                continue;
            }
            let start = hist.len() - needed;
            let repeats = (1..PATTERN_REPEATS).all(|rep| {
                (0..period).all(|i| hist[start + i] == hist[start + rep * period + i])
            });
            if repeats {
                return true;
            }
        }
        false
    }

    pub fn statistics(&self) -> String {
        let mut hot: Vec<_> = self.block_visits.iter().collect();
        hot.sort_by(|a, b| b.1.cmp(a.1));
        let mut out = String::from("block visit statistics:\n");
        for ((func, block), visits) in hot.into_iter().take(8) {
            let instrs = self
                .block_instructions
                .get(&(func.clone(), *block))
                .copied()
                .unwrap_or(0);
            out.push_str(&format!(
                "  {}::bb{}: {} visits, {} instructions\n",
                func, block, visits, instrs
            ));
        }
        out
    }

    fn location(&self) -> (String, BlockId) {
        self.current.clone().unwrap_or_else(|| (String::from("<unknown>"), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_visits_trip_past_threshold() {
        let mut guard = CompilationGuard::with_config(GuardConfig {
            max_block_visits: 4,
            ..GuardConfig::default()
        });
        for _ in 0..4 {
            guard.enter_block("f", 0).unwrap();
        }
        let err = guard.enter_block("f", 0).unwrap_err();
        assert_eq!(err.category, crate::diagnostics::ErrorCategory::ResourceExhaustion);
        assert!(err.message.contains("infinite loop detected"));
    }

    #[test]
    fn consecutive_duplicates_trip() {
        let mut guard = CompilationGuard::with_config(GuardConfig {
            max_consecutive_duplicates: 3,
            ..GuardConfig::default()
        });
        guard.begin_function("f");
        guard.enter_block("f", 0).unwrap();
        for _ in 0..3 {
            guard.record_instruction("store i32").unwrap();
        }
        assert!(guard.record_instruction("store i32").is_err());
    }

    #[test]
    fn periodic_pattern_trips() {
        let mut guard = CompilationGuard::new();
        guard.begin_function("f");
        guard.enter_block("f", 0).unwrap();
        let mut tripped = false;
        for _ in 0..4 {
            for fp in ["load a", "add a b", "store a"] {
                if guard.record_instruction(fp).is_err() {
                    tripped = true;
                }
            }
        }
        assert!(tripped);
    }

    #[test]
    fn distinct_instructions_pass() {
        let mut guard = CompilationGuard::new();
        guard.begin_function("f");
        guard.enter_block("f", 0).unwrap();
        for i in 0..200 {
            guard.record_instruction(&format!("instr {}", i)).unwrap();
        }
    }

    #[test]
    fn reset_clears_counters() {
        let mut guard = CompilationGuard::with_config(GuardConfig {
            max_block_visits: 2,
            ..GuardConfig::default()
        });
        guard.enter_block("f", 0).unwrap();
        guard.enter_block("f", 0).unwrap();
        guard.reset();
        assert!(guard.enter_block("f", 0).is_ok());
    }
}
