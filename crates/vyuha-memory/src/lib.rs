// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bi-temporal memory and unified recall.
//!
//! Three cooperating stores: an append-only graph-edge store tracking both
//! valid time and transaction time, a recall engine fusing lexical, dense,
//! graph, and epistemic rankers with reciprocal-rank fusion, and a
//! procedural memory that crystallizes repeated tool sequences into
//! parameterised procedures.  [`MemoryStore`] ties them to a home directory
//! with an `init → use → flush → close` lifecycle.

mod edges;
mod error;
mod procedures;
mod recall;
mod store;
mod text;
mod transcript;

pub use edges::{temporal_decay, EdgeStore, GraphEdge};
pub use error::MemoryError;
pub use procedures::{
    ArgSlot, ParamType, Procedure, ProcedureExtractor, ProcedureIndex, ProcedureStep, ToolTrace,
    TraceCall,
};
pub use recall::{Embedder, MemoryItem, RecallEngine, RecallHit};
pub use store::MemoryStore;
pub use text::{fnv1a64, jaccard, tokenize, Bm25Index};
pub use transcript::{TranscriptLog, TurnRecord};
