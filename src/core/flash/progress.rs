use crate::domain::config::ProgressConfig;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;

const FALLBACK_CEILING: u8 = 99;

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\s*%").expect("percent pattern is valid"))
}

/// Last explicit percentage in `chunk`, if any value in 0..=100 is present
pub fn parse_percent(chunk: &str) -> Option<u8> {
    percent_pattern()
        .captures_iter(chunk)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .filter(|value| *value <= 100)
        .last()
        .map(|value| value as u8)
}

/// Per-job progress derivation.
///
/// Explicit percentages from the tool are authoritative. A tool that prints
/// none gets a fixed increment per non-blank chunk, capped below 100. The
/// reported value never decreases: an explicit value below what the fallback
/// already reported is held back, though it still ends the fallback.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    current: u8,
    explicit_seen: bool,
    step: u8,
    cap: u8,
}

impl ProgressTracker {
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            current: 0,
            explicit_seen: false,
            step: config.fallback_step,
            cap: config.fallback_cap.min(FALLBACK_CEILING),
        }
    }

    /// Feed one chunk of output; returns the new value when progress advanced
    pub fn observe(&mut self, chunk: &str) -> Option<u8> {
        let candidate = match parse_percent(chunk) {
            Some(percent) => {
                self.explicit_seen = true;
                percent
            }
            None if self.explicit_seen || chunk.trim().is_empty() => return None,
            None => self.current.saturating_add(self.step).min(self.cap),
        };

        self.advance(candidate)
    }

    /// Mark the job successful; yields 100 unless already reported
    pub fn finish(&mut self) -> Option<u8> {
        self.advance(100)
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    fn advance(&mut self, candidate: u8) -> Option<u8> {
        if candidate > self.current {
            self.current = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}

/// Bounded tail of captured tool output, used for failure summaries
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    len: usize,
    limit: usize,
}

impl OutputTail {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            len: 0,
            limit,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() || self.limit == 0 {
            return;
        }

        self.len += line.len() + 1;
        self.lines.push_back(line.to_string());

        while self.len > self.limit {
            let Some(front) = self.lines.front_mut() else {
                break;
            };
            let excess = self.len - self.limit;
            if excess >= front.len() + 1 {
                self.len -= front.len() + 1;
                self.lines.pop_front();
            } else {
                let mut cut = excess;
                while !front.is_char_boundary(cut) {
                    cut += 1;
                }
                front.drain(..cut);
                self.len -= cut;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Captured output joined by newlines, at most `limit` bytes
    pub fn contents(&self) -> String {
        let mut joined = self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        if joined.len() > self.limit {
            let mut cut = joined.len() - self.limit;
            while !joined.is_char_boundary(cut) {
                cut += 1;
            }
            joined.drain(..cut);
        }
        joined
    }
}
