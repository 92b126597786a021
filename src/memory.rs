// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One question and the answer given to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Sliding window over the most recent turns of one conversation.
/// Owned by the caller; never persisted.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    window: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ConversationMemory {
    /// A window of zero is treated as one
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            turns: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record a turn, evicting the oldest once the window is full
    pub fn append(&mut self, turn: ConversationTurn) {
        while self.turns.len() >= self.window {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Retained turns, oldest first
    pub fn recent(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixth_turn_evicts_oldest() {
        let mut memory = ConversationMemory::new(5);
        for i in 1..=6 {
            memory.append(ConversationTurn::new(format!("q{}", i), format!("a{}", i)));
        }

        assert_eq!(memory.len(), 5);
        let questions: Vec<&str> = memory.recent().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4", "q5", "q6"]);
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::default();
        memory.append(ConversationTurn::new("q", "a"));
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.recent().count(), 0);
    }

    #[test]
    fn test_zero_window_keeps_one_turn() {
        let mut memory = ConversationMemory::new(0);
        memory.append(ConversationTurn::new("q1", "a1"));
        memory.append(ConversationTurn::new("q2", "a2"));
        assert_eq!(memory.window(), 1);
        assert_eq!(memory.recent().next().unwrap().question, "q2");
    }
}
