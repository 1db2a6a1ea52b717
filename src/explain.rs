use crate::planner::error::{PlanError, PlanResult};
use crate::planner::node::{NodeId, NodeKind, PlanNode};
use crate::planner::query::{PlannedQuery, SubplanRef};
use crate::session::PlanOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    #[default]
    Text,
    Json,
}

/// Represents a complete explanation of a query plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanExplanation {
    pub title: String,
    pub nodes: Vec<ExplanationNode>,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub estimated_rows: f64,
    pub subplans: Vec<SubplanExplanation>,
}

/// Represents a single node in the plan explanation
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationNode {
    pub operation: String,
    pub properties: Vec<(String, String)>,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub estimated_rows: f64,
    pub depth: usize,
}

/// A subplan rendered after the main tree.
#[derive(Debug, Clone, Serialize)]
pub struct SubplanExplanation {
    /// `InitPlan n` or `SubPlan n`.
    pub label: String,
    pub nodes: Vec<ExplanationNode>,
}

impl PlanExplanation {
    /// Explain the chosen path of the main level of `query`.
    ///
    /// Fails with [`PlanError::TooDeep`] when any tree nests deeper than
    /// `max_depth`.
    pub fn new(query: &PlannedQuery, title: &str, max_depth: usize) -> PlanResult<Self> {
        let root = query.main_level()?.chosen;
        let header = query.arena.header(root)?;
        let mut nodes = Vec::new();
        explain_tree(query, root, 0, max_depth, &mut nodes)?;

        let mut seen = BTreeSet::new();
        let mut subplans = Vec::new();
        for level in &query.levels {
            let refs = level
                .init_plans
                .iter()
                .map(|r| (r, "InitPlan"))
                .chain(level.noninit_plans.iter().map(|r| (r, "SubPlan")));
            for (reference, kind) in refs {
                if let Some(subplan) =
                    explain_subplan(query, reference, kind, max_depth, &mut seen)?
                {
                    subplans.push(subplan);
                }
            }
        }

        Ok(Self {
            title: title.to_string(),
            nodes,
            startup_cost: header.startup_cost,
            total_cost: header.total_cost,
            estimated_rows: header.rows,
            subplans,
        })
    }
}

fn explain_subplan(
    query: &PlannedQuery,
    reference: &SubplanRef,
    kind: &str,
    max_depth: usize,
    seen: &mut BTreeSet<usize>,
) -> PlanResult<Option<SubplanExplanation>> {
    if !seen.insert(reference.plan_id) {
        return Ok(None);
    }
    let Some(plan) = &query.subplan(reference.plan_id)?.plan else {
        return Ok(None);
    };
    let mut nodes = Vec::new();
    explain_tree(query, plan.root, 1, max_depth, &mut nodes)?;
    Ok(Some(SubplanExplanation {
        label: format!("{kind} {}", reference.plan_id),
        nodes,
    }))
}

fn explain_tree(
    query: &PlannedQuery,
    root: NodeId,
    base_depth: usize,
    max_depth: usize,
    nodes: &mut Vec<ExplanationNode>,
) -> PlanResult<()> {
    let mut stack = vec![(root, base_depth)];
    while let Some((id, depth)) = stack.pop() {
        if depth > max_depth {
            return Err(PlanError::TooDeep {
                depth,
                limit: max_depth,
            });
        }
        let node = query.arena.get(id)?;
        nodes.push(ExplanationNode {
            operation: node.name().to_string(),
            properties: node_properties(query, node),
            startup_cost: node.header.startup_cost,
            total_cost: node.header.total_cost,
            estimated_rows: node.header.rows,
            depth,
        });

        // A subquery scan's child lives in another level; it is still shown inline.
        let children = node.kind.children();
        stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
    }
    Ok(())
}

fn node_properties(query: &PlannedQuery, node: &PlanNode) -> Vec<(String, String)> {
    let mut props = Vec::new();
    let relation = node
        .header
        .parent
        .and_then(|parent| query.relation(parent).ok());

    // Only leaf scans name their relation.
    if let Some(rel) = relation {
        if node.kind.children().is_empty() {
            props.push(("Relation".to_string(), rel.name.clone()));
        }
    }

    if let Some(access) = node.kind.index_access() {
        let name = relation
            .and_then(|rel| rel.index(access.index))
            .map_or_else(|| access.index.to_string(), |index| index.name.clone());
        props.push(("Index".to_string(), name));
        if access.loop_count > 1.0 {
            props.push(("Loops".to_string(), format!("{:.0}", access.loop_count)));
        }
    }

    match &node.kind {
        NodeKind::NestLoop(join)
        | NodeKind::HashJoin { join, .. }
        | NodeKind::MergeJoin { join, .. } => {
            props.push(("Join Type".to_string(), format!("{:?}", join.join_type)));
        }
        NodeKind::Gather { num_workers, .. } | NodeKind::GatherMerge { num_workers, .. } => {
            props.push(("Workers Planned".to_string(), num_workers.to_string()));
        }
        NodeKind::Agg { strategy, .. } | NodeKind::GroupingSets { strategy, .. } => {
            props.push(("Strategy".to_string(), format!("{strategy:?}")));
        }
        NodeKind::CteScan { plan_id } => {
            props.push(("CTE".to_string(), format!("SubPlan {plan_id}")));
        }
        _ => {}
    }

    if let Some(param) = &node.header.param {
        props.push(("Required Outer".to_string(), param.to_string()));
    }
    let sorts = matches!(
        node.kind,
        NodeKind::Sort { .. }
            | NodeKind::IncrementalSort { .. }
            | NodeKind::GatherMerge { .. }
            | NodeKind::MergeAppend { .. }
    );
    if sorts && !node.header.pathkeys.is_empty() {
        props.push(("Sort Key".to_string(), node.header.pathkeys.join(", ")));
    }
    props
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &[ExplanationNode]) -> fmt::Result {
    for node in nodes {
        let indent = "  ".repeat(node.depth);
        writeln!(
            f,
            "{}{} (cost={:.2}..{:.2}, rows={:.0})",
            indent, node.operation, node.startup_cost, node.total_cost, node.estimated_rows
        )?;
        for (key, value) in &node.properties {
            writeln!(f, "{indent}  {key}: {value}")?;
        }
    }
    Ok(())
}

impl fmt::Display for PlanExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.title)?;
        writeln!(
            f,
            "Total Cost: {:.2}, Estimated Rows: {:.0}",
            self.total_cost, self.estimated_rows
        )?;
        writeln!(f, "{}", "-".repeat(80))?;
        write_nodes(f, &self.nodes)?;

        for subplan in &self.subplans {
            writeln!(f, "  {}", subplan.label)?;
            write_nodes(f, &subplan.nodes)?;
        }
        Ok(())
    }
}

/// Explain output for one statement: the real plan, then the hypothetical one.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainDocument {
    pub real: PlanExplanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothetical: Option<PlanExplanation>,
}

impl ExplainDocument {
    pub fn new(
        outcome: &PlanOutcome,
        show_hypothetical: bool,
        max_depth: usize,
    ) -> PlanResult<Self> {
        let real = PlanExplanation::new(&outcome.real, "Query Plan", max_depth)?;
        let hypothetical = match &outcome.hypothetical {
            Some(plan) if show_hypothetical => Some(PlanExplanation::new(
                plan,
                "Hypothetical Plan",
                max_depth,
            )?),
            _ => None,
        };
        Ok(Self { real, hypothetical })
    }

    pub fn render(&self, format: ExplainFormat) -> Result<String, serde_json::Error> {
        match format {
            ExplainFormat::Text => Ok(self.to_string()),
            ExplainFormat::Json => serde_json::to_string_pretty(self),
        }
    }
}

impl fmt::Display for ExplainDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.real)?;
        if let Some(hypothetical) = &self.hypothetical {
            writeln!(f, "{}", "=".repeat(80))?;
            write!(f, "{hypothetical}")?;
        }
        Ok(())
    }
}
