//! Bounded conversation memory.
//!
//! An ordered log of [`Exchange`]s, oldest first. The log never holds more
//! than `max_memory` entries: every append is followed immediately by
//! trimming from the front. Exchange ids come from a counter that keeps
//! increasing across trims and only restarts when the log is cleared.
//!
//! Not internally synchronized; the pipeline wraps it in a mutex.

use std::collections::VecDeque;

use chrono::Utc;

use crate::models::{Exchange, MemorySummary};

/// Rendered in place of history when there is none.
pub const NO_HISTORY: &str = "No previous conversation.";

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    log: VecDeque<Exchange>,
    max_memory: usize,
    next_id: u64,
    prompt_window: usize,
    answer_preview_chars: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ConversationMemory {
    pub fn new(max_memory: usize) -> Self {
        Self {
            log: VecDeque::new(),
            max_memory: max_memory.max(1),
            next_id: 1,
            prompt_window: 5,
            answer_preview_chars: 100,
        }
    }

    /// Override how much history [`format_for_prompt`](Self::format_for_prompt) renders.
    pub fn with_prompt_window(mut self, exchanges: usize, answer_preview_chars: usize) -> Self {
        self.prompt_window = exchanges.max(1);
        self.answer_preview_chars = answer_preview_chars;
        self
    }

    /// Record an exchange and trim to capacity. Always succeeds.
    pub fn append(
        &mut self,
        question: impl Into<String>,
        response: impl Into<String>,
        sources: Vec<String>,
    ) -> Exchange {
        let exchange = Exchange {
            exchange_id: self.next_id,
            timestamp: Utc::now(),
            question: question.into(),
            response: response.into(),
            sources,
        };
        self.next_id += 1;
        self.log.push_back(exchange.clone());
        self.trim();
        exchange
    }

    /// Snapshot of the whole log, oldest first.
    pub fn get_all(&self) -> Vec<Exchange> {
        self.log.iter().cloned().collect()
    }

    /// The last `min(n, len)` exchanges, oldest first.
    pub fn get_recent(&self, n: usize) -> Vec<Exchange> {
        let skip = self.log.len().saturating_sub(n);
        self.log.iter().skip(skip).cloned().collect()
    }

    /// Case-insensitive substring search over questions and responses.
    ///
    /// Filters first, then keeps the most recent `limit` matches, returned
    /// oldest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Exchange> {
        let needle = query.to_lowercase();
        let matches: Vec<&Exchange> = self
            .log
            .iter()
            .filter(|ex| {
                ex.question.to_lowercase().contains(&needle)
                    || ex.response.to_lowercase().contains(&needle)
            })
            .collect();
        let skip = matches.len().saturating_sub(limit);
        matches.into_iter().skip(skip).cloned().collect()
    }

    /// Empty the log and restart exchange ids at 1.
    pub fn clear(&mut self) {
        self.log.clear();
        self.next_id = 1;
    }

    /// Set capacity to `max(1, n)`, trimming the oldest entries if needed.
    pub fn set_capacity(&mut self, n: usize) {
        self.max_memory = n.max(1);
        self.trim();
    }

    pub fn capacity(&self) -> usize {
        self.max_memory
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn summary(&self) -> MemorySummary {
        MemorySummary {
            total: self.log.len(),
            is_empty: self.log.is_empty(),
            is_full: self.log.len() >= self.max_memory,
            latest_timestamp: self.log.back().map(|ex| ex.timestamp),
        }
    }

    /// Render recent history for the prompt.
    ///
    /// Each exchange becomes `Q: <question>\nA: <answer prefix>...\n`; entries
    /// are joined with a newline, oldest first.
    pub fn format_for_prompt(&self) -> String {
        if self.log.is_empty() {
            return NO_HISTORY.to_string();
        }
        self.get_recent(self.prompt_window)
            .iter()
            .map(|ex| {
                let preview: String = ex.response.chars().take(self.answer_preview_chars).collect();
                format!("Q: {}\nA: {}...\n", ex.question, preview)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn trim(&mut self) {
        while self.log.len() > self.max_memory {
            self.log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize, capacity: usize) -> ConversationMemory {
        let mut memory = ConversationMemory::new(capacity);
        for i in 1..=n {
            memory.append(format!("question {}", i), format!("answer {}", i), vec![]);
        }
        memory
    }

    #[test]
    fn append_assigns_sequential_ids() {
        let mut memory = ConversationMemory::new(5);
        let first = memory.append("q1", "a1", vec!["a.txt".into()]);
        let second = memory.append("q2", "a2", vec![]);
        assert_eq!(first.exchange_id, 1);
        assert_eq!(second.exchange_id, 2);
        assert_eq!(memory.get_all()[0].sources, vec!["a.txt".to_string()]);
    }

    #[test]
    fn fifo_trim_keeps_most_recent() {
        let memory = filled(25, 20);
        let all = memory.get_all();
        assert_eq!(all.len(), 20);
        let ids: Vec<u64> = all.iter().map(|ex| ex.exchange_id).collect();
        assert_eq!(ids, (6..=25).collect::<Vec<u64>>());
    }

    #[test]
    fn bound_holds_after_every_append() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..10 {
            memory.append(format!("q{}", i), "a", vec![]);
            assert!(memory.len() <= 3);
        }
        let ids: Vec<u64> = memory.get_all().iter().map(|e| e.exchange_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn snapshot_is_detached() {
        let memory = filled(2, 5);
        let mut snapshot = memory.get_all();
        snapshot.clear();
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn recent_handles_bounds() {
        let memory = filled(4, 10);
        assert!(memory.get_recent(0).is_empty());
        let recent = memory.get_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "question 3");
        assert_eq!(recent[1].question, "question 4");
        assert_eq!(memory.get_recent(100).len(), 4);
        assert!(ConversationMemory::new(3).get_recent(3).is_empty());
    }

    #[test]
    fn search_filters_then_takes_tail() {
        let mut memory = ConversationMemory::new(10);
        memory.append("Tell me about PARIS", "It is in France", vec![]);
        memory.append("Weather?", "Sunny", vec![]);
        memory.append("Capital?", "paris, of course", vec![]);
        memory.append("Paris population?", "About two million", vec![]);

        let all = memory.search("paris", 10);
        let ids: Vec<u64> = all.iter().map(|e| e.exchange_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        let limited = memory.search("Paris", 2);
        let ids: Vec<u64> = limited.iter().map(|e| e.exchange_id).collect();
        assert_eq!(ids, vec![3, 4]);

        assert!(memory.search("london", 5).is_empty());
        assert!(memory.search("paris", 0).is_empty());
    }

    #[test]
    fn clear_restarts_ids() {
        let mut memory = filled(3, 10);
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.append("q", "a", vec![]).exchange_id, 1);
    }

    #[test]
    fn set_capacity_trims_immediately() {
        let mut memory = filled(10, 20);
        memory.set_capacity(3);
        let ids: Vec<u64> = memory.get_all().iter().map(|e| e.exchange_id).collect();
        assert_eq!(ids, vec![8, 9, 10]);
        memory.set_capacity(0);
        assert_eq!(memory.capacity(), 1);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn summary_reports_state() {
        let mut memory = ConversationMemory::new(2);
        let empty = memory.summary();
        assert_eq!(empty.total, 0);
        assert!(empty.is_empty);
        assert!(!empty.is_full);
        assert!(empty.latest_timestamp.is_none());

        memory.append("q1", "a1", vec![]);
        let last = memory.append("q2", "a2", vec![]);
        let full = memory.summary();
        assert_eq!(full.total, 2);
        assert!(full.is_full);
        assert_eq!(full.latest_timestamp, Some(last.timestamp));
    }

    #[test]
    fn prompt_format_empty() {
        assert_eq!(ConversationMemory::new(5).format_for_prompt(), NO_HISTORY);
    }

    #[test]
    fn prompt_format_truncates_and_windows() {
        let mut memory = ConversationMemory::new(20);
        for i in 1..=7 {
            memory.append(format!("q{}", i), "x".repeat(150), vec![]);
        }
        let text = memory.format_for_prompt();
        assert!(!text.contains("Q: q2\n"));
        assert!(text.starts_with("Q: q3\n"));
        assert!(text.contains(&format!("A: {}...\n", "x".repeat(100))));
        assert!(!text.contains(&"x".repeat(101)));
        assert_eq!(text.matches("Q: ").count(), 5);
    }

    #[test]
    fn prompt_window_never_hides_history() {
        let mut memory = ConversationMemory::new(5).with_prompt_window(0, 100);
        memory.append("Where?", "Paris", vec![]);
        assert_eq!(memory.format_for_prompt(), "Q: Where?\nA: Paris...\n");
    }

    #[test]
    fn prompt_format_short_answers_keep_marker() {
        let mut memory = ConversationMemory::new(5);
        memory.append("Where?", "Paris", vec![]);
        memory.append("When?", "Now", vec![]);
        assert_eq!(
            memory.format_for_prompt(),
            "Q: Where?\nA: Paris...\n\nQ: When?\nA: Now...\n"
        );
    }
}
