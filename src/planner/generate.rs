use crate::config::OptimizerConfig;
use crate::cost::{BitmapInput, CostModel, StandardCostModel};
use crate::planner::node::{IndexAccess, NodeId, NodeKind, PathHeader, PlanArena, PlanNode};
use crate::planner::relation::{IndexCandidate, IsolatedRelation, RelSet, RelationInfo};
use std::collections::BTreeSet;

/// Access paths generated for one isolated relation.
///
/// The paths live in their own arena; callers graft the chosen one into
/// the plan they are rewriting.
#[derive(Debug, Clone, Default)]
pub struct PathList {
    pub arena: PlanArena,
    pub paths: Vec<NodeId>,
}

impl PathList {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Iterate generated paths with their nodes, in generation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PlanNode)> {
        self.paths
            .iter()
            .filter_map(|&id| self.arena.get(id).ok().map(|node| (id, node)))
    }

    fn push(&mut self, node: PlanNode) -> NodeId {
        let id = self.arena.push(node);
        self.paths.push(id);
        id
    }
}

/// The host's index access path generation.
pub trait IndexPathGenerator {
    /// Generate every index access path the planner would consider for
    /// `relation`, using only the indexes it carries.
    fn generate_index_paths(
        &self,
        relation: &IsolatedRelation,
        config: &OptimizerConfig,
    ) -> PathList;
}

/// Generates plain, index-only, and bitmap paths per candidate index.
#[derive(Debug, Clone)]
pub struct StandardPathGenerator<M> {
    model: M,
}

impl<M: CostModel> StandardPathGenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Outer relation sets the relation's join clauses can be parameterized by.
    fn parameterizations(rel: &RelationInfo) -> Vec<Option<RelSet>> {
        let outer_sets: BTreeSet<RelSet> = rel
            .join_clauses
            .iter()
            .filter_map(|c| c.outer_rels.clone())
            .collect();
        std::iter::once(None)
            .chain(outer_sets.into_iter().map(Some))
            .collect()
    }

    fn usable_with(rel: &RelationInfo, index: &IndexCandidate, param: Option<&RelSet>) -> bool {
        match param {
            None => true,
            Some(outer) => rel.movable_join_clauses(Some(outer)).any(|clause| {
                clause
                    .leading_column()
                    .is_some_and(|col| index.has_column(col))
            }),
        }
    }

    fn scan_header(rel: &RelationInfo, param: Option<&RelSet>) -> PathHeader {
        PathHeader {
            param: param.cloned(),
            width: rel.width,
            ..PathHeader::for_relation(rel.id)
        }
    }

    /// Costed index scan node for `index`, not yet added to any arena.
    fn index_path(
        &self,
        rel: &mut RelationInfo,
        index: &IndexCandidate,
        param: Option<&RelSet>,
        pathkeys: Vec<String>,
        index_only: bool,
        config: &OptimizerConfig,
    ) -> PlanNode {
        let mut header = Self::scan_header(rel, param);
        header.pathkeys = pathkeys;
        let mut access = IndexAccess::new(index.id);
        self.model
            .cost_index(rel, &header, &mut access, index_only, config)
            .apply_to(&mut header);
        let kind = if index_only {
            NodeKind::IndexOnlyScan(access)
        } else {
            NodeKind::IndexScan(access)
        };
        PlanNode::new(header, kind)
    }

    fn bitmap_heap_path(
        &self,
        out: &mut PathList,
        rel: &mut RelationInfo,
        bitmapqual: NodeId,
        bitmap: BitmapInput,
        param: Option<&RelSet>,
        config: &OptimizerConfig,
    ) {
        let mut header = Self::scan_header(rel, param);
        self.model
            .cost_bitmap_heap_scan(rel, &header, bitmap, 1.0, config)
            .apply_to(&mut header);
        out.push(PlanNode::new(
            header,
            NodeKind::BitmapHeapScan {
                bitmapqual,
                loop_count: 1.0,
            },
        ));
    }

    fn generate_bitmap_paths(
        &self,
        out: &mut PathList,
        rel: &mut RelationInfo,
        indexes: &[IndexCandidate],
        params: &[Option<RelSet>],
        config: &OptimizerConfig,
    ) {
        for param in params {
            let mut inputs = Vec::new();
            for index in indexes {
                if !Self::usable_with(rel, index, param.as_ref()) {
                    continue;
                }
                let node = self.index_path(rel, index, param.as_ref(), Vec::new(), false, config);
                let bitmap = match node.kind.index_access() {
                    Some(access) => BitmapInput::from_index(access, node.header.rows, config),
                    None => continue,
                };
                // Bitmap index scans feed the heap scan; they are not paths themselves.
                let qual = out.arena.push(node);
                self.bitmap_heap_path(out, rel, qual, bitmap, param.as_ref(), config);
                inputs.push((qual, bitmap));
            }

            if inputs.len() >= 2 {
                let bitmaps = inputs.iter().map(|(_, b)| *b).collect::<Vec<_>>();
                let combined = self.model.cost_bitmap_and(&bitmaps, config);
                let mut header = Self::scan_header(rel, param.as_ref());
                header.set_estimate(
                    combined.cost,
                    combined.cost,
                    combined.selectivity * rel.tuples,
                );
                let and = out.arena.push(PlanNode::new(
                    header,
                    NodeKind::BitmapAnd {
                        quals: inputs.iter().map(|(id, _)| *id).collect(),
                        selectivity: combined.selectivity,
                    },
                ));
                self.bitmap_heap_path(out, rel, and, combined, param.as_ref(), config);
            }
        }
    }
}

impl Default for StandardPathGenerator<StandardCostModel> {
    fn default() -> Self {
        Self::new(StandardCostModel::new())
    }
}

impl<M: CostModel> IndexPathGenerator for StandardPathGenerator<M> {
    fn generate_index_paths(
        &self,
        relation: &IsolatedRelation,
        config: &OptimizerConfig,
    ) -> PathList {
        let mut out = PathList::default();
        // Scratch copy so clause cost memos never leak into the caller's relation.
        let mut rel = relation.relation.clone();
        let indexes = relation.indexes().to_vec();
        let params = Self::parameterizations(&rel);

        for index in &indexes {
            let pathkeys = match (index.leading_column(), rel.query_pathkeys.first()) {
                (Some(leading), Some(wanted)) if leading == wanted => rel.query_pathkeys.clone(),
                _ => Vec::new(),
            };
            let index_only = config.flags.enable_indexonlyscan && index.covers(&rel.target_columns);

            for param in &params {
                if !Self::usable_with(&rel, index, param.as_ref()) {
                    continue;
                }
                let node = self.index_path(
                    &mut rel,
                    index,
                    param.as_ref(),
                    pathkeys.clone(),
                    index_only,
                    config,
                );
                out.push(node);
            }
        }

        if relation.allow_bitmap && config.flags.enable_bitmapscan {
            self.generate_bitmap_paths(&mut out, &mut rel, &indexes, &params, config);
        }

        log::trace!(
            "generated {} index paths for {} from {} indexes",
            out.len(),
            rel.name,
            indexes.len()
        );
        out
    }
}
