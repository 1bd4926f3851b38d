// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Budget-aware request assembly.
//!
//! The manager turns an [`AgentState`] into a provider request, compacting
//! the message history in tiers as the token budget fills:
//!
//! - at 60% usage, adjacent same-role text messages are merged;
//! - at 75%, older tool-result bodies are elided to a one-line summary
//!   keyed by their tool-call id;
//! - at 90%, informational compaction selects a message subset by TF-IDF
//!   saliency, MinHash near-duplicate clustering, and TextRank centrality.
//!
//! System messages, the final message, and tool results whose call lives in
//! a retained assistant message always survive.  A deterministic oldest-drop
//! fallback guarantees the built request fits the budget.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use vyuha_model::{CompletionRequest, Message, Part, RequestOptions, Role};

use crate::session::AgentState;

const MERGE_THRESHOLD: f32 = 0.60;
const ELIDE_THRESHOLD: f32 = 0.75;
const INFORMATIONAL_THRESHOLD: f32 = 0.90;

/// Tool-result bodies in the most recent N messages are never elided.
const KEEP_RECENT_BODIES: usize = 4;

const MINHASH_BANDS: usize = 8;
const MINHASH_NEAR_DUP: usize = 6;

pub struct ContextManager {
    budget: usize,
}

impl ContextManager {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Assemble the provider request for the current state, compacting the
    /// history as needed so the result fits the token budget.
    pub fn build(&self, state: &AgentState) -> CompletionRequest {
        let overhead = self.overhead_tokens(state);
        let mut messages = state.messages.clone();

        if self.fraction(&messages, overhead) >= MERGE_THRESHOLD {
            merge_adjacent_text(&mut messages);
        }
        if self.fraction(&messages, overhead) >= ELIDE_THRESHOLD {
            elide_tool_result_bodies(&mut messages, KEEP_RECENT_BODIES);
        }
        if self.fraction(&messages, overhead) >= INFORMATIONAL_THRESHOLD {
            let target = self.budget.saturating_sub(overhead);
            messages = informational_compact(messages, target);
        }

        // Hard guarantee: drop the oldest unprotected messages until the
        // request fits.  Protected messages are system messages and the
        // final message.
        let before = messages.len();
        while tokens(&messages) + overhead > self.budget && messages.len() > 1 {
            let Some(idx) = messages[..messages.len() - 1]
                .iter()
                .position(|m| m.role != Role::System)
            else {
                break;
            };
            messages.remove(idx);
            drop_orphan_tool_results(&mut messages);
        }
        if messages.len() != before {
            debug!(
                dropped = before - messages.len(),
                "hard budget fallback dropped oldest messages"
            );
        }
        let remaining = self.budget.saturating_sub(overhead);
        if tokens(&messages) > remaining {
            truncate_parts_to_fit(&mut messages, remaining);
        }

        CompletionRequest {
            system: Some(state.system_prompt.clone()),
            messages,
            tools: state.tools.clone(),
            options: RequestOptions {
                max_tokens: None,
                temperature: None,
                thinking_budget: state.thinking.budget_tokens(),
            },
        }
    }

    fn overhead_tokens(&self, state: &AgentState) -> usize {
        let schema_tokens: usize = state
            .tools
            .iter()
            .map(|s| (s.name.len() + s.description.len() + s.parameters.to_string().len()) / 4)
            .sum();
        state.system_prompt.len() / 4 + schema_tokens
    }

    fn fraction(&self, messages: &[Message], overhead: usize) -> f32 {
        if self.budget == 0 {
            return 0.0;
        }
        (tokens(messages) + overhead) as f32 / self.budget as f32
    }
}

fn tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.approx_tokens()).sum()
}

fn is_text_only(m: &Message) -> bool {
    m.parts.iter().all(|p| matches!(p, Part::Text { .. }))
}

/// Tier 1: merge runs of adjacent same-role text-only messages into one.
fn merge_adjacent_text(messages: &mut Vec<Message>) {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages.drain(..) {
        match merged.last_mut() {
            Some(prev)
                if prev.role == msg.role && is_text_only(prev) && is_text_only(&msg) =>
            {
                let combined = format!("{}\n{}", prev.text(), msg.text());
                prev.parts = vec![Part::text(combined)];
            }
            _ => merged.push(msg),
        }
    }
    *messages = merged;
}

/// Tier 2: replace older tool-result bodies with a one-line summary keyed
/// by the tool-call id.  The most recent `keep_recent` messages keep their
/// bodies, as do results answering the final assistant message.
fn elide_tool_result_bodies(messages: &mut [Message], keep_recent: usize) {
    let len = messages.len();
    let protected_ids: HashSet<String> = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| {
            m.parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    for (idx, msg) in messages.iter_mut().enumerate() {
        if idx + keep_recent >= len || msg.role != Role::ToolResult {
            continue;
        }
        for part in &mut msg.parts {
            if let Part::ToolResult {
                tool_call_id,
                content,
                ..
            } = part
            {
                if protected_ids.contains(tool_call_id) || content.len() <= 80 {
                    continue;
                }
                let head: String = content.chars().take(60).collect();
                *content = format!("[elided result of {tool_call_id}: {head}…]");
            }
        }
    }
}

/// Tier 3: informational compaction.  Scores every message with TF-IDF
/// saliency and TextRank centrality, collapses MinHash near-duplicates, and
/// keeps the best-scoring subset that fits `target` tokens.  System
/// messages and the final message always survive; tool-call/result pairing
/// is repaired afterwards so no result is left without its call.
fn informational_compact(messages: Vec<Message>, target: usize) -> Vec<Message> {
    let n = messages.len();
    if n <= 2 {
        return messages;
    }

    let token_sets: Vec<HashSet<String>> = messages
        .iter()
        .map(|m| flat_tokens(m).into_iter().collect())
        .collect();

    let protected: HashSet<usize> = messages
        .iter()
        .enumerate()
        .filter(|(i, m)| m.role == Role::System || *i == n - 1)
        .map(|(i, _)| i)
        .collect();

    // TF-IDF saliency per message.
    let mut doc_freq: HashMap<&String, usize> = HashMap::new();
    for set in &token_sets {
        for t in set {
            *doc_freq.entry(t).or_default() += 1;
        }
    }
    let tfidf: Vec<f64> = messages
        .iter()
        .zip(&token_sets)
        .map(|(m, set)| {
            let terms = flat_tokens(m);
            if terms.is_empty() {
                return 0.0;
            }
            let score: f64 = set
                .iter()
                .map(|t| {
                    let tf = terms.iter().filter(|x| *x == t).count() as f64;
                    let idf = (n as f64 / doc_freq[t] as f64).ln() + 1.0;
                    tf * idf
                })
                .sum();
            score / terms.len() as f64
        })
        .collect();

    // MinHash near-duplicate clustering: later duplicates of an earlier
    // message are dropped unless protected.
    let signatures: Vec<[u64; MINHASH_BANDS]> = token_sets.iter().map(minhash).collect();
    let mut duplicate = vec![false; n];
    for i in 0..n {
        if duplicate[i] {
            continue;
        }
        for j in (i + 1)..n {
            if protected.contains(&j) || duplicate[j] {
                continue;
            }
            let matching = signatures[i]
                .iter()
                .zip(&signatures[j])
                .filter(|(a, b)| a == b)
                .count();
            if matching >= MINHASH_NEAR_DUP && !token_sets[j].is_empty() {
                duplicate[j] = true;
            }
        }
    }

    // TextRank centrality over Jaccard similarity.
    let textrank = textrank_scores(&token_sets);

    let max_tfidf = tfidf.iter().cloned().fold(f64::MIN_POSITIVE, f64::max);
    let max_rank = textrank.iter().cloned().fold(f64::MIN_POSITIVE, f64::max);
    let combined: Vec<f64> = (0..n)
        .map(|i| 0.5 * tfidf[i] / max_tfidf + 0.5 * textrank[i] / max_rank)
        .collect();

    // Greedy selection: protected first, then best-scoring survivors.
    let mut keep: HashSet<usize> = protected.clone();
    let mut used: usize = keep.iter().map(|&i| messages[i].approx_tokens()).sum();

    let mut order: Vec<usize> = (0..n)
        .filter(|i| !keep.contains(i) && !duplicate[*i])
        .collect();
    order.sort_by(|&a, &b| {
        combined[b]
            .partial_cmp(&combined[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    for i in order {
        let cost = messages[i].approx_tokens();
        if used + cost > target {
            continue;
        }
        keep.insert(i);
        used += cost;
    }

    // Tool pairing repair.  A retained result message drags its call
    // message back in, retained calls drag their results in, and anything
    // still orphaned is dropped — an unmatched call or result would be
    // rejected upstream.
    let call_owner: HashMap<String, usize> = messages
        .iter()
        .enumerate()
        .flat_map(|(i, m)| {
            m.parts.iter().filter_map(move |p| match p {
                Part::ToolCall { id, .. } => Some((id.clone(), i)),
                _ => None,
            })
        })
        .collect();
    for (i, m) in messages.iter().enumerate() {
        if m.role != Role::ToolResult || !keep.contains(&i) {
            continue;
        }
        for p in &m.parts {
            if let Part::ToolResult { tool_call_id, .. } = p {
                if let Some(owner) = call_owner.get(tool_call_id) {
                    keep.insert(*owner);
                }
            }
        }
    }
    for (i, m) in messages.iter().enumerate() {
        if m.role != Role::ToolResult {
            continue;
        }
        let owners_kept = m.parts.iter().all(|p| match p {
            Part::ToolResult { tool_call_id, .. } => call_owner
                .get(tool_call_id)
                .map_or(false, |owner| keep.contains(owner)),
            _ => true,
        });
        if owners_kept && m.parts.iter().any(|p| matches!(p, Part::ToolResult { .. })) {
            keep.insert(i);
        } else {
            keep.remove(&i);
        }
    }

    messages
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, m)| m)
        .collect()
}

/// After an unconditional drop, restore call/result pairing: results whose
/// call message is gone are removed, and calls whose result message is gone
/// are stripped.  Either half alone would be rejected upstream.
fn drop_orphan_tool_results(messages: &mut Vec<Message>) {
    let call_ids: HashSet<String> = messages
        .iter()
        .flat_map(|m| {
            m.parts.iter().filter_map(|p| match p {
                Part::ToolCall { id, .. } => Some(id.clone()),
                _ => None,
            })
        })
        .collect();
    messages.retain(|m| {
        if m.role != Role::ToolResult {
            return true;
        }
        m.parts.iter().all(|p| match p {
            Part::ToolResult { tool_call_id, .. } => call_ids.contains(tool_call_id),
            _ => true,
        })
    });

    let result_ids: HashSet<String> = messages
        .iter()
        .flat_map(|m| {
            m.parts.iter().filter_map(|p| match p {
                Part::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
        })
        .collect();
    for m in messages.iter_mut() {
        if m.role != Role::Assistant {
            continue;
        }
        m.parts.retain(|p| match p {
            Part::ToolCall { id, .. } => result_ids.contains(id),
            _ => true,
        });
    }
    messages.retain(|m| !m.parts.is_empty());
}

/// Last resort for a transcript that cannot be compacted below the budget
/// by dropping whole messages: clip part contents, older messages first,
/// touching the final message only when clipping everything else was not
/// enough.
fn truncate_parts_to_fit(messages: &mut [Message], budget_tokens: usize) {
    fn clip(part: &mut Part, cap: usize) {
        let content = match part {
            Part::Text { text } | Part::Thinking { text } => text,
            Part::ToolResult { content, .. } => content,
            _ => return,
        };
        if content.len() > cap {
            let mut cut = cap;
            while cut > 0 && !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push('…');
        }
    }

    let len = messages.len();
    for m in messages.iter_mut().take(len.saturating_sub(1)) {
        for p in &mut m.parts {
            clip(p, 80);
        }
    }
    let still_over = messages.iter().map(|m| m.approx_tokens()).sum::<usize>() > budget_tokens;
    if still_over {
        if let Some(last) = messages.last_mut() {
            let cap = budget_tokens.saturating_mul(4) / last.parts.len().max(1);
            for p in &mut last.parts {
                clip(p, cap.max(16));
            }
        }
    }
}

fn flat_tokens(m: &Message) -> Vec<String> {
    let mut text = m.text();
    for p in &m.parts {
        if let Part::ToolResult { content, .. } = p {
            text.push(' ');
            text.push_str(content);
        }
    }
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn seeded_hash(seed: u64, token: &str) -> u64 {
    // FNV-1a folded with a band seed; only has to be deterministic within a
    // process run.
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    for b in token.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn minhash(tokens: &HashSet<String>) -> [u64; MINHASH_BANDS] {
    let mut sig = [u64::MAX; MINHASH_BANDS];
    for (band, slot) in sig.iter_mut().enumerate() {
        for t in tokens {
            let h = seeded_hash(band as u64, t);
            if h < *slot {
                *slot = h;
            }
        }
    }
    sig
}

fn textrank_scores(token_sets: &[HashSet<String>]) -> Vec<f64> {
    const DAMPING: f64 = 0.85;
    const ITERATIONS: usize = 15;
    let n = token_sets.len();

    let mut sim = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let inter = token_sets[i].intersection(&token_sets[j]).count() as f64;
            let union = token_sets[i].union(&token_sets[j]).count() as f64;
            let s = if union > 0.0 { inter / union } else { 0.0 };
            sim[i][j] = s;
            sim[j][i] = s;
        }
    }
    let degree: Vec<f64> = sim.iter().map(|row| row.iter().sum()).collect();

    let mut rank = vec![1.0 / n as f64; n];
    for _ in 0..ITERATIONS {
        let mut next = vec![(1.0 - DAMPING) / n as f64; n];
        for (j, row) in sim.iter().enumerate() {
            if degree[j] <= 0.0 {
                continue;
            }
            for (i, item) in next.iter_mut().enumerate() {
                *item += DAMPING * row[i] / degree[j] * rank[j];
            }
        }
        rank = next;
    }
    rank
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vyuha_model::Message;

    fn state_with(messages: Vec<Message>) -> AgentState {
        let mut s = AgentState::new("mock", "m", "system prompt");
        for m in messages {
            s.push(m);
        }
        s
    }

    fn request_tokens(req: &CompletionRequest) -> usize {
        tokens(&req.messages) + req.system.as_deref().map_or(0, |s| s.len() / 4)
    }

    // ── No compaction under budget ────────────────────────────────────────────

    #[test]
    fn small_history_passes_through_untouched() {
        let state = state_with(vec![Message::user("hello"), Message::assistant("hi")]);
        let req = ContextManager::new(10_000).build(&state);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.system.as_deref(), Some("system prompt"));
    }

    #[test]
    fn thinking_budget_is_forwarded() {
        let state = state_with(vec![Message::user("q")])
            .with_thinking(vyuha_config::ThinkingLevel::High);
        let req = ContextManager::new(10_000).build(&state);
        assert_eq!(req.options.thinking_budget, Some(32_768));
    }

    // ── Tier 1: merge ─────────────────────────────────────────────────────────

    #[test]
    fn merge_collapses_adjacent_same_role_text() {
        let mut msgs = vec![
            Message::user("one"),
            Message::user("two"),
            Message::assistant("three"),
        ];
        merge_adjacent_text(&mut msgs);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text(), "one\ntwo");
    }

    #[test]
    fn merge_leaves_tool_messages_alone() {
        let mut msgs = vec![
            Message::assistant_parts(vec![Part::tool_call("c1", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c1", "out", false)]),
            Message::tool_results(vec![Part::tool_result("c2", "out", false)]),
        ];
        merge_adjacent_text(&mut msgs);
        assert_eq!(msgs.len(), 3);
    }

    // ── Tier 2: elide ─────────────────────────────────────────────────────────

    #[test]
    fn elide_replaces_old_bodies_and_keeps_recent() {
        let big = "x".repeat(500);
        let mut msgs = vec![
            Message::assistant_parts(vec![Part::tool_call("c1", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c1", big.clone(), false)]),
            Message::user("next"),
            Message::assistant_parts(vec![Part::tool_call("c2", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c2", big.clone(), false)]),
            Message::assistant("done"),
        ];
        elide_tool_result_bodies(&mut msgs, 4);
        match &msgs[1].parts[0] {
            Part::ToolResult { content, .. } => {
                assert!(content.starts_with("[elided result of c1"), "{content}");
            }
            other => panic!("unexpected part {other:?}"),
        }
        // c2's result sits inside the recent window.
        match &msgs[4].parts[0] {
            Part::ToolResult { content, .. } => assert_eq!(content, &big),
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn elide_protects_results_of_final_assistant_call() {
        let big = "y".repeat(500);
        let mut msgs = vec![
            Message::assistant_parts(vec![Part::tool_call("c9", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c9", big.clone(), false)]),
        ];
        // Window of zero — only the final-assistant protection applies.
        elide_tool_result_bodies(&mut msgs, 0);
        match &msgs[1].parts[0] {
            Part::ToolResult { content, .. } => assert_eq!(content, &big),
            other => panic!("unexpected part {other:?}"),
        }
    }

    // ── Tier 3: informational ─────────────────────────────────────────────────

    #[test]
    fn informational_keeps_system_and_final_message() {
        let mut msgs = vec![Message::system("rules")];
        for i in 0..20 {
            msgs.push(Message::user(format!("filler message number {i} with words")));
        }
        msgs.push(Message::user("the final question"));
        let out = informational_compact(msgs, 30);
        assert!(out.iter().any(|m| m.role == Role::System));
        assert_eq!(out.last().unwrap().text(), "the final question");
    }

    #[test]
    fn informational_drops_near_duplicates() {
        let mut msgs = vec![];
        for _ in 0..5 {
            msgs.push(Message::user("identical duplicated content here repeated"));
        }
        msgs.push(Message::user("unique closing message"));
        let out = informational_compact(msgs, 1_000);
        let dup_count = out
            .iter()
            .filter(|m| m.text().contains("identical duplicated"))
            .count();
        assert_eq!(dup_count, 1, "near-duplicates collapse to one");
    }

    #[test]
    fn informational_preserves_tool_pairing() {
        let msgs = vec![
            Message::assistant_parts(vec![Part::tool_call("c1", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c1", "contents of a file", false)]),
            Message::user("and now a question about something else entirely"),
        ];
        let out = informational_compact(msgs, 1_000);
        let has_call = out.iter().any(|m| !m.tool_calls().is_empty());
        let has_result = out.iter().any(|m| m.role == Role::ToolResult);
        assert_eq!(has_call, has_result, "calls and results stay paired");
    }

    // ── Budget guarantee ──────────────────────────────────────────────────────

    #[test]
    fn built_request_always_fits_budget() {
        let mut msgs = Vec::new();
        for i in 0..200 {
            msgs.push(Message::user(format!(
                "message {i}: {}",
                "lorem ipsum dolor sit amet ".repeat(10)
            )));
        }
        let state = state_with(msgs);
        let budget = 500;
        let req = ContextManager::new(budget).build(&state);
        assert!(
            request_tokens(&req) <= budget,
            "request {} tokens exceeds budget {budget}",
            request_tokens(&req)
        );
        assert!(!req.messages.is_empty());
    }

    #[test]
    fn final_message_survives_hard_fallback() {
        let mut msgs = Vec::new();
        for _ in 0..100 {
            msgs.push(Message::user("padding ".repeat(50)));
        }
        msgs.push(Message::user("KEEPME final"));
        let state = state_with(msgs);
        let req = ContextManager::new(300).build(&state);
        assert!(req
            .messages
            .last()
            .map(|m| m.text().contains("KEEPME"))
            .unwrap_or(false));
    }

    #[test]
    fn oversized_single_message_is_clipped_to_budget() {
        let state = state_with(vec![Message::user("word ".repeat(5_000))]);
        let budget = 200;
        let req = ContextManager::new(budget).build(&state);
        assert!(request_tokens(&req) <= budget);
        assert!(req.messages[0].text().ends_with('…'));
    }

    #[test]
    fn hard_fallback_drops_orphaned_results() {
        let mut msgs = vec![
            Message::assistant_parts(vec![Part::tool_call("c1", "read", "{}")], None),
            Message::tool_results(vec![Part::tool_result("c1", "x".repeat(4000), false)]),
        ];
        for _ in 0..50 {
            msgs.push(Message::user("padding ".repeat(40)));
        }
        msgs.push(Message::user("final"));
        let state = state_with(msgs);
        let req = ContextManager::new(300).build(&state);
        let calls: HashSet<String> = req
            .messages
            .iter()
            .flat_map(|m| {
                m.parts.iter().filter_map(|p| match p {
                    Part::ToolCall { id, .. } => Some(id.clone()),
                    _ => None,
                })
            })
            .collect();
        for m in &req.messages {
            for p in &m.parts {
                if let Part::ToolResult { tool_call_id, .. } = p {
                    assert!(calls.contains(tool_call_id), "orphaned result {tool_call_id}");
                }
            }
        }
    }
}
