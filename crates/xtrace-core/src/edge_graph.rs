// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reconstruction and validation of the causal edge graph of a trace.
//!
//! Events are scanned in emission order while the set of op ids seen so far grows.
//! An event's `Edge` is resolved when its target is already in that set, since an
//! event can only link to something emitted before it. A trace is valid when every
//! edge resolves; events without an edge are roots and always valid.
//!
//! Failures are reported, never acted on: nothing here changes runtime behavior.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Write as _};

use tracing::debug;

use crate::event::{Event, Label};
use crate::xtrace::{OpId, TaskId, XTrace};

/// An event whose `Edge` points at an op id not emitted before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEdge {
    /// Position of the event in the scanned list.
    pub index: usize,
    pub layer: String,
    pub label: Label,
    pub x_trace: XTrace,
    pub missing: OpId,
}

impl Display for UnresolvedEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event #{} ({} {}, X-Trace {}) links to op id {} which was never emitted before it",
            self.index, self.layer, self.label, self.x_trace, self.missing
        )
    }
}

/// Outcome of validating the events of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeReport {
    task_id: Option<TaskId>,
    events: usize,
    roots: Vec<usize>,
    unresolved: Vec<UnresolvedEdge>,
    foreign: Vec<usize>,
}

impl EdgeReport {
    /// Every edge resolves, there is exactly one root and no event belongs to
    /// another task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.unresolved.is_empty() && self.foreign.is_empty()
    }

    /// Task id of the first scanned event.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Indices of events without an edge.
    #[must_use]
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    #[must_use]
    pub fn unresolved(&self) -> &[UnresolvedEdge] {
        &self.unresolved
    }

    /// Indices of events belonging to a different task than the first event.
    #[must_use]
    pub fn foreign_events(&self) -> &[usize] {
        &self.foreign
    }
}

/// Edge validation with an optional whitelist of op ids recorded elsewhere,
/// e.g. the upstream op a continued trace links to.
#[derive(Debug, Clone, Default)]
pub struct EdgeValidator {
    external: HashSet<OpId>,
}

impl EdgeValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts edges to `op_id` even though it is not in the scanned list, e.g. the
    /// parent op of a trace continued from another process.
    #[must_use]
    pub fn allow_external(mut self, op_id: OpId) -> Self {
        self.external.insert(op_id);
        self
    }

    /// # Arguments
    ///
    /// * `events` - Events of one task, in any order
    ///
    /// # Returns
    ///
    /// A report of unresolved edges, roots and foreign events.
    #[must_use]
    pub fn validate(&self, events: &[Event]) -> EdgeReport {
        let mut report = EdgeReport {
            task_id: events.first().map(|e| *e.task_id()),
            events: events.len(),
            ..Default::default()
        };
        let mut seen: HashSet<OpId> = self.external.clone();

        for (index, event) in events.iter().enumerate() {
            if Some(event.task_id()) != report.task_id.as_ref() {
                debug!("Event #{index} belongs to task {}", event.task_id());
                report.foreign.push(index);
                continue;
            }

            match event.edge() {
                None => report.roots.push(index),
                Some(edge) if seen.contains(edge) => {}
                Some(edge) => {
                    let unresolved = UnresolvedEdge {
                        index,
                        layer: event.layer().to_string(),
                        label: event.label(),
                        x_trace: *event.x_trace(),
                        missing: *edge,
                    };
                    debug!("Unresolved edge: {unresolved}");
                    report.unresolved.push(unresolved);
                }
            }

            seen.insert(*event.op_id());
        }

        report
    }
}

/// Validates `events` with no external parents allowed.
#[must_use]
pub fn validate_edges(events: &[Event]) -> EdgeReport {
    EdgeValidator::new().validate(events)
}

/// Whether any event in `events` was emitted with `op_id`.
#[must_use]
pub fn has_edge(op_id: &OpId, events: &[Event]) -> bool {
    events.iter().any(|e| e.op_id() == op_id)
}

/// Splits a mixed stream into per-task lists, keeping emission order within each task
/// and first-appearance order across tasks.
#[must_use]
pub fn group_by_task(events: Vec<Event>) -> Vec<(TaskId, Vec<Event>)> {
    let mut index: HashMap<TaskId, usize> = HashMap::new();
    let mut groups: Vec<(TaskId, Vec<Event>)> = Vec::new();

    for event in events {
        let task_id = *event.task_id();
        let slot = *index.entry(task_id).or_insert_with(|| {
            groups.push((task_id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(event);
    }

    groups
}

/// The causal tree of one trace: each event's op id linked to its edge target.
#[derive(Debug, Clone, Default)]
pub struct EdgeGraph {
    order: Vec<OpId>,
    parents: HashMap<OpId, Option<OpId>>,
    children: HashMap<OpId, Vec<OpId>>,
}

impl EdgeGraph {
    /// Indexes `events` by op id. Later events with a duplicate op id replace
    /// earlier ones.
    #[must_use]
    pub fn build(events: &[Event]) -> Self {
        let mut graph = Self::default();
        for event in events {
            let op_id = *event.op_id();
            let edge = event.edge().copied();
            graph.order.push(op_id);
            graph.parents.insert(op_id, edge);
            if let Some(parent) = edge {
                graph.children.entry(parent).or_default().push(op_id);
            }
        }
        graph
    }

    /// Number of events indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Op ids of events without an edge, in emission order.
    #[must_use]
    pub fn roots(&self) -> Vec<OpId> {
        self.order
            .iter()
            .filter(|op| matches!(self.parents.get(op), Some(None)))
            .copied()
            .collect()
    }

    /// The op `op_id` links to, if it is known and has an edge.
    #[must_use]
    pub fn parent(&self, op_id: &OpId) -> Option<OpId> {
        self.parents.get(op_id).copied().flatten()
    }

    /// Ops linking directly to `op_id`, in emission order.
    #[must_use]
    pub fn children(&self, op_id: &OpId) -> &[OpId] {
        self.children.get(op_id).map_or(&[], Vec::as_slice)
    }

    /// Number of edges between `op_id` and the root it hangs from, stopping at an
    /// unknown parent. `None` when `op_id` is not in the graph.
    #[must_use]
    pub fn depth(&self, op_id: &OpId) -> Option<usize> {
        if !self.parents.contains_key(op_id) {
            return None;
        }
        let mut depth = 0;
        let mut current = *op_id;
        let mut visited = HashSet::new();

        while let Some(parent) = self.parent(&current) {
            if !self.parents.contains_key(&parent) || !visited.insert(parent) {
                break;
            }
            depth += 1;
            current = parent;
        }
        Some(depth)
    }
}

/// Indented outline of a trace, two spaces per open span:
///
/// ```text
///   entry rack 2B...01
///     entry faraday 2B...01
///     exit faraday 2B...01
///   exit rack 2B...01
/// ```
#[must_use]
pub fn render_outline(events: &[Event]) -> String {
    let mut out = String::new();
    let mut depth = 0usize;

    for event in events {
        if event.label() == Label::Entry {
            depth += 1;
        }
        let _ = writeln!(
            out,
            "{}{} {} {}",
            "  ".repeat(depth),
            event.label(),
            event.layer(),
            event.x_trace()
        );
        if event.label() == Label::Exit {
            depth = depth.saturating_sub(1);
        }
    }

    out
}
