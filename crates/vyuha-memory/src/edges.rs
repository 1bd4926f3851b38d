// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only graph edges on two time axes.
//!
//! Every edge carries a *valid-time* window (`valid_from`/`valid_until` —
//! when the fact holds in the world) and a *transaction-time* window
//! (`recorded_at`/`superseded_at` — when the store believed it).  Edges are
//! never mutated in place: updating a fact supersedes the prior version and
//! appends a fresh one, so any past belief state can be reconstructed.
//!
//! Within one `(source, target, relationship)` triple at most one edge is
//! *current* (`superseded_at` unset) at any time.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MemoryError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub weight: f64,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
}

impl GraphEdge {
    /// Whether this version is the store's current belief for its triple.
    pub fn is_current(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Whether the fact holds at `valid_time`:
    /// `valid_from ≤ t < (valid_until ?? ∞)`.
    pub fn valid_at(&self, valid_time: DateTime<Utc>) -> bool {
        self.valid_from <= valid_time && self.valid_until.map_or(true, |u| valid_time < u)
    }

    /// Whether the store believed this version at `record_time`:
    /// `recorded_at ≤ t < (superseded_at ?? ∞)`.
    pub fn recorded_as_of(&self, record_time: DateTime<Utc>) -> bool {
        self.recorded_at <= record_time && self.superseded_at.map_or(true, |s| record_time < s)
    }
}

/// `weight · 2^(−elapsed/half_life)` where elapsed counts from the end of
/// the valid window (or its start when open-ended).  Never increases weight.
pub fn temporal_decay(edge: &GraphEdge, now: DateTime<Utc>, half_life: Duration) -> f64 {
    let anchor = edge.valid_until.unwrap_or(edge.valid_from);
    let elapsed_ms = (now - anchor).num_milliseconds().max(0) as f64;
    let half_life_ms = half_life.num_milliseconds() as f64;
    if half_life_ms <= 0.0 {
        return edge.weight;
    }
    edge.weight * 2f64.powf(-elapsed_ms / half_life_ms)
}

/// Append-only bi-temporal edge store.
///
/// Mutations are serialized behind a write lock; readers take a consistent
/// snapshot of the edge set as of their read.
pub struct EdgeStore {
    edges: RwLock<Vec<GraphEdge>>,
}

impl Default for EdgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeStore {
    pub fn new() -> Self {
        Self {
            edges: RwLock::new(Vec::new()),
        }
    }

    /// Rehydrate from an ordered edge log.
    pub fn from_log(edges: Vec<GraphEdge>) -> Self {
        Self {
            edges: RwLock::new(edges),
        }
    }

    pub fn len(&self) -> usize {
        self.edges.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the full edge log, in recording order.
    pub fn snapshot(&self) -> Vec<GraphEdge> {
        self.edges.read().unwrap().clone()
    }

    /// Record a new current edge.  `valid_from` defaults to `recorded_at`.
    pub fn create_edge(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
        weight: f64,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<GraphEdge, MemoryError> {
        let now = Utc::now();
        self.create_edge_at(source, target, relationship, weight, valid_from, now)
    }

    /// Timestamp-explicit variant of [`create_edge`](Self::create_edge) used
    /// by replay and tests.
    pub fn create_edge_at(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
        weight: f64,
        valid_from: Option<DateTime<Utc>>,
        recorded_at: DateTime<Utc>,
    ) -> Result<GraphEdge, MemoryError> {
        let source = source.into();
        let target = target.into();
        let relationship = relationship.into();
        let mut edges = self.edges.write().unwrap();

        if edges
            .iter()
            .any(|e| e.is_current() && e.source == source && e.target == target && e.relationship == relationship)
        {
            return Err(MemoryError::CurrentEdgeExists {
                source_node: source,
                target,
                relationship,
            });
        }

        let edge = GraphEdge {
            id: Uuid::new_v4().to_string(),
            source,
            target,
            relationship,
            weight,
            valid_from: valid_from.unwrap_or(recorded_at),
            valid_until: None,
            recorded_at,
            superseded_at: None,
        };
        edges.push(edge.clone());
        Ok(edge)
    }

    /// Mark the prior version historical and append a fresh current version
    /// with the same valid window and a fresh `recorded_at`.
    ///
    /// Returns `(old, new)` where `old` carries the `superseded_at` stamp.
    pub fn supersede(
        &self,
        edge_id: &str,
        new_weight: Option<f64>,
        new_relationship: Option<String>,
    ) -> Result<(GraphEdge, GraphEdge), MemoryError> {
        self.supersede_at(edge_id, new_weight, new_relationship, Utc::now())
    }

    pub fn supersede_at(
        &self,
        edge_id: &str,
        new_weight: Option<f64>,
        new_relationship: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(GraphEdge, GraphEdge), MemoryError> {
        let mut edges = self.edges.write().unwrap();
        let old = edges
            .iter_mut()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| MemoryError::EdgeNotFound(edge_id.to_string()))?;
        if !old.is_current() {
            return Err(MemoryError::EdgeSuperseded(edge_id.to_string()));
        }
        old.superseded_at = Some(now);
        let old_copy = old.clone();

        let new = GraphEdge {
            id: Uuid::new_v4().to_string(),
            source: old_copy.source.clone(),
            target: old_copy.target.clone(),
            relationship: new_relationship.unwrap_or_else(|| old_copy.relationship.clone()),
            weight: new_weight.unwrap_or(old_copy.weight),
            valid_from: old_copy.valid_from,
            valid_until: old_copy.valid_until,
            recorded_at: now,
            superseded_at: None,
        };
        edges.push(new.clone());
        Ok((old_copy, new))
    }

    /// Close the valid window of an edge: the fact stops holding at `at`
    /// (defaults to now).
    pub fn expire(&self, edge_id: &str, at: Option<DateTime<Utc>>) -> Result<(), MemoryError> {
        let at = at.unwrap_or_else(Utc::now);
        let mut edges = self.edges.write().unwrap();
        let edge = edges
            .iter_mut()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| MemoryError::EdgeNotFound(edge_id.to_string()))?;
        if at < edge.valid_from {
            return Err(MemoryError::InvalidWindow {
                valid_from: edge.valid_from,
                valid_until: at,
            });
        }
        edge.valid_until = Some(at);
        Ok(())
    }

    /// Edges whose fact holds at `valid_time` and, when `record_time` is
    /// given, that the store believed at that record time.
    ///
    /// Without `record_time` only current versions are consulted, so the
    /// result reflects present belief about the given valid time.
    pub fn query_at(
        &self,
        valid_time: DateTime<Utc>,
        record_time: Option<DateTime<Utc>>,
    ) -> Vec<GraphEdge> {
        self.edges
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.valid_at(valid_time))
            .filter(|e| match record_time {
                Some(t) => e.recorded_as_of(t),
                None => e.is_current(),
            })
            .cloned()
            .collect()
    }

    /// All versions ever recorded between `source` and `target`, sorted by
    /// `recorded_at`.
    pub fn history(&self, source: &str, target: &str) -> Vec<GraphEdge> {
        let mut out: Vec<GraphEdge> = self
            .edges
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.source == source && e.target == target)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.recorded_at);
        out
    }

    /// Drop superseded edges older than the retention window.  Current
    /// versions always survive.  Returns the number of edges dropped.
    pub fn compact(&self, retention: Duration) -> usize {
        self.compact_at(retention, Utc::now())
    }

    pub fn compact_at(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let mut edges = self.edges.write().unwrap();
        let before = edges.len();
        edges.retain(|e| match e.superseded_at {
            Some(s) => s >= cutoff,
            None => true,
        });
        before - edges.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
