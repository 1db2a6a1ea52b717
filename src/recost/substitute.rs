use crate::config::OptimizerConfig;
use crate::planner::generate::{IndexPathGenerator, PathList};
use crate::planner::node::{IndexAccess, NodeId, NodeKind, PathHeader, PlanArena, PlanNode};
use crate::planner::relation::{IndexCandidate, IndexId, RelSet, RelationInfo};
use crate::recost::error::{RecostError, RecostResult};
use serde::{Deserialize, Serialize};

/// One registered substitution: indexes whose name contains `search` are
/// evaluated as if `index` were used instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionEntry {
    pub search: String,
    pub index: IndexId,
}

/// Registered substitutions, matched in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionTable {
    entries: Vec<SubstitutionEntry>,
}

impl SubstitutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a substitution. Both arguments are required; a rejected
    /// registration leaves the table unchanged.
    pub fn register(&mut self, search: Option<&str>, index: Option<IndexId>) -> RecostResult<()> {
        let search = search.ok_or_else(|| {
            RecostError::InvalidRegistration("search string is missing".to_string())
        })?;
        let index = index
            .ok_or_else(|| RecostError::InvalidRegistration("index id is missing".to_string()))?;

        log::debug!("registered substitution '{search}' -> index {index}");
        self.entries.push(SubstitutionEntry {
            search: search.to_string(),
            index,
        });
        Ok(())
    }

    pub fn reset(&mut self) {
        log::debug!("cleared {} substitutions", self.entries.len());
        self.entries.clear();
        self.entries.shrink_to_fit();
    }

    pub fn entries(&self) -> &[SubstitutionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replacement indexes for `index_name`, in registration order.
    ///
    /// An entry qualifies when its search string occurs in the name and `rel`
    /// owns its target; entries whose target `rel` lacks are skipped.
    pub fn candidates<'t, 'r>(
        &'t self,
        rel: &'r RelationInfo,
        index_name: &'t str,
    ) -> impl Iterator<Item = (&'t SubstitutionEntry, &'r IndexCandidate)> {
        self.entries
            .iter()
            .filter(move |entry| index_name.contains(entry.search.as_str()))
            .filter_map(move |entry| rel.index(entry.index).map(|index| (entry, index)))
    }

    /// First qualifying replacement index for `index_name`.
    pub fn lookup<'r>(&self, rel: &'r RelationInfo, index_name: &str) -> Option<&'r IndexCandidate> {
        self.candidates(rel, index_name).next().map(|(_, index)| index)
    }
}

impl FromIterator<SubstitutionEntry> for SubstitutionTable {
    fn from_iter<I: IntoIterator<Item = SubstitutionEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a successful lookup, ready to be applied to the plan.
#[derive(Debug, Clone)]
pub enum Replacement {
    /// Use a generated path; its subtree still lives in `paths.arena`.
    Path { paths: PathList, chosen: NodeId },
    /// Keep the node but turn an index-only scan into a plain index scan.
    Degraded { index: IndexId },
}

fn param_subset(candidate: Option<&RelSet>, original: Option<&RelSet>) -> bool {
    match (candidate, original) {
        (Some(candidate), Some(original)) => candidate.is_subset_of(original),
        _ => false,
    }
}

/// Pick the index path that best stands in for `original`.
///
/// First satisfied wins: equal parameterization; when the original has no
/// parameterization, matching presence of pathkeys; a parameterization
/// that is a subset of the original's; no parameterization at all.
pub fn select_index_path(
    paths: &PathList,
    original: &PathHeader,
    index_only: bool,
) -> Option<NodeId> {
    let candidates = paths
        .iter()
        .filter(|(_, node)| match node.kind {
            NodeKind::IndexOnlyScan(_) => true,
            NodeKind::IndexScan(_) => !index_only,
            _ => false,
        })
        .collect::<Vec<_>>();

    let wanted = original.param.as_ref();
    candidates
        .iter()
        .find(|(_, n)| n.header.param.as_ref() == wanted)
        .or_else(|| {
            if wanted.is_some() {
                return None;
            }
            candidates.iter().find(|(_, n)| {
                n.header.pathkeys.is_empty() == original.pathkeys.is_empty()
            })
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|(_, n)| param_subset(n.header.param.as_ref(), wanted))
        })
        .or_else(|| candidates.iter().find(|(_, n)| n.header.param.is_none()))
        .map(|(id, _)| *id)
}

/// Pick the bitmap heap path that best stands in for `original`:
/// equal parameterization, then a subset, then none.
pub fn select_bitmap_path(paths: &PathList, original: &PathHeader) -> Option<NodeId> {
    let candidates = paths
        .iter()
        .filter(|(_, node)| matches!(node.kind, NodeKind::BitmapHeapScan { .. }))
        .collect::<Vec<_>>();

    let wanted = original.param.as_ref();
    candidates
        .iter()
        .find(|(_, n)| n.header.param.as_ref() == wanted)
        .or_else(|| {
            candidates
                .iter()
                .find(|(_, n)| param_subset(n.header.param.as_ref(), wanted))
        })
        .or_else(|| candidates.iter().find(|(_, n)| n.header.param.is_none()))
        .map(|(id, _)| *id)
}

/// Indexes feeding the bitmap tree at `root`, with substitutions applied.
///
/// Returns `None` unless at least one registration matched.
fn bitmap_index_set(
    arena: &PlanArena,
    rel: &RelationInfo,
    root: NodeId,
    table: &SubstitutionTable,
) -> RecostResult<Option<Vec<IndexId>>> {
    let mut indexes = Vec::new();
    let mut matched = false;

    for id in arena.subtree(root)? {
        let Some(access) = arena.get(id)?.kind.index_access() else {
            continue;
        };
        let Some(index) = rel.index(access.index) else {
            continue;
        };
        if let Some(replacement) = table.lookup(rel, &index.name) {
            matched = true;
            indexes.push(replacement.id);
        } else if index.unique {
            indexes.push(index.id);
        }
    }

    Ok(matched.then_some(indexes))
}

/// Look for a registered substitution for the scan at `target`.
pub fn find_replacement<G: IndexPathGenerator + ?Sized>(
    arena: &PlanArena,
    rel: &RelationInfo,
    target: NodeId,
    table: &SubstitutionTable,
    generator: &G,
    config: &OptimizerConfig,
) -> RecostResult<Option<Replacement>> {
    let node = arena.get(target)?;
    match &node.kind {
        NodeKind::IndexScan(access) | NodeKind::IndexOnlyScan(access) => {
            let Some(index) = rel.index(access.index) else {
                return Ok(None);
            };
            let index_only = matches!(node.kind, NodeKind::IndexOnlyScan(_));

            for (entry, substitute) in table.candidates(rel, &index.name) {
                let isolated = rel.isolate(Some(&[substitute.id]), false);
                let paths = generator.generate_index_paths(&isolated, config);
                if let Some(chosen) = select_index_path(&paths, &node.header, index_only) {
                    log::debug!(
                        "substituting {} with {} on {}",
                        index.name,
                        substitute.name,
                        rel.name
                    );
                    return Ok(Some(Replacement::Path { paths, chosen }));
                }

                if index_only {
                    if let Some(first) = isolated.indexes().first() {
                        log::debug!(
                            "no index-only path for {} on {}, degrading to index scan",
                            first.name,
                            rel.name
                        );
                        return Ok(Some(Replacement::Degraded { index: first.id }));
                    }
                }
                log::debug!(
                    "no usable path for {} on {} via '{}', trying the next registration",
                    substitute.name,
                    rel.name,
                    entry.search
                );
            }
            Ok(None)
        }
        NodeKind::BitmapHeapScan { bitmapqual, .. } => {
            let Some(indexes) = bitmap_index_set(arena, rel, *bitmapqual, table)? else {
                return Ok(None);
            };
            let isolated = rel.isolate(Some(&indexes), true);
            let paths = generator.generate_index_paths(&isolated, config);
            Ok(select_bitmap_path(&paths, &node.header).map(|chosen| {
                log::debug!("substituting bitmap scan over {} indexes on {}", indexes.len(), rel.name);
                Replacement::Path { paths, chosen }
            }))
        }
        _ => Ok(None),
    }
}

/// Carry the execution context of `original` over into `replacement`.
fn carry_over(original: &PlanNode, replacement: &mut PlanNode) {
    let from = &original.header;
    let to = &mut replacement.header;
    to.parallel_aware = from.parallel_aware;
    to.parallel_safe = from.parallel_safe;
    to.parallel_workers = from.parallel_workers;
    to.param = from.param.clone();
    to.set_estimate(from.startup_cost, from.total_cost, from.rows);

    match (&original.kind, &mut replacement.kind) {
        (
            NodeKind::IndexScan(from) | NodeKind::IndexOnlyScan(from),
            NodeKind::IndexScan(to) | NodeKind::IndexOnlyScan(to),
        ) => {
            to.loop_count = from.loop_count;
            to.partial = from.partial;
            to.selectivity = from.selectivity;
        }
        (
            NodeKind::BitmapHeapScan {
                loop_count: from, ..
            },
            NodeKind::BitmapHeapScan { loop_count: to, .. },
        ) => {
            *to = *from;
        }
        _ => {}
    }
}

/// Overwrite the node at `target` with `replacement`.
///
/// The slot keeps its id and parent linkage, so every holder of `target`
/// now sees the replacement.
pub fn apply(arena: &mut PlanArena, target: NodeId, replacement: Replacement) -> RecostResult<()> {
    let original = arena.get(target)?.clone();
    let mut node = match replacement {
        Replacement::Path { paths, chosen } => arena.graft_node(&paths.arena, chosen)?,
        Replacement::Degraded { index } => {
            let access = match &original.kind {
                NodeKind::IndexScan(access) | NodeKind::IndexOnlyScan(access) => IndexAccess {
                    index,
                    ..access.clone()
                },
                _ => IndexAccess::new(index),
            };
            PlanNode::new(original.header.clone(), NodeKind::IndexScan(access))
        }
    };
    carry_over(&original, &mut node);
    arena.replace_node(target, node)?;
    Ok(())
}
