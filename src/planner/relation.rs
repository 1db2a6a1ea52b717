use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a base relation within one planned statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelId(pub usize);

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel#{}", self.0)
    }
}

/// Catalog identifier of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of relations a parameterized path requires from its outer side.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelSet(BTreeSet<RelId>);

impl RelSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, rel: RelId) -> bool {
        self.0.insert(rel)
    }

    pub fn contains(&self, rel: RelId) -> bool {
        self.0.contains(&rel)
    }

    pub fn is_subset_of(&self, other: &RelSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelId> {
        self.0.iter()
    }
}

impl FromIterator<RelId> for RelSet {
    fn from_iter<I: IntoIterator<Item = RelId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.0.iter().map(|r| r.0.to_string()).collect::<Vec<_>>();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Evaluation cost of an expression: one-time plus per-row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualCost {
    pub startup: f64,
    pub per_tuple: f64,
}

impl QualCost {
    pub const fn new(startup: f64, per_tuple: f64) -> Self {
        Self { startup, per_tuple }
    }

    pub fn add(&self, other: &QualCost) -> QualCost {
        QualCost::new(self.startup + other.startup, self.per_tuple + other.per_tuple)
    }
}

/// A filter or join clause with its selectivity and cached evaluation cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Columns referenced on the owning relation, leading column first.
    pub columns: Vec<String>,
    pub selectivity: f64,
    /// Number of operator invocations needed to evaluate the clause.
    #[serde(default = "default_operators")]
    pub operators: u32,
    /// Outer relations referenced by a join clause; `None` for base filters.
    #[serde(default)]
    pub outer_rels: Option<RelSet>,
    /// Memoized evaluation cost; `None` means unknown.
    #[serde(default)]
    pub eval_cost: Option<QualCost>,
}

fn default_operators() -> u32 {
    1
}

impl Clause {
    pub fn new(column: &str, selectivity: f64) -> Self {
        Self {
            columns: vec![column.to_string()],
            selectivity,
            operators: 1,
            outer_rels: None,
            eval_cost: None,
        }
    }

    pub fn join(column: &str, selectivity: f64, outer_rels: RelSet) -> Self {
        Self {
            outer_rels: Some(outer_rels),
            ..Self::new(column, selectivity)
        }
    }

    pub fn leading_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    /// Mark the cached evaluation cost unknown.
    pub fn forget_eval_cost(&mut self) {
        self.eval_cost = None;
    }
}

/// A candidate index on a relation, real or hypothetical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCandidate {
    pub id: IndexId,
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub columns: Vec<String>,
    #[serde(default = "default_index_pages")]
    pub pages: f64,
    #[serde(default)]
    pub hypothetical: bool,
}

fn default_index_pages() -> f64 {
    1.0
}

impl IndexCandidate {
    pub fn leading_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// True when every column in `needed` is stored in the index.
    pub fn covers(&self, needed: &[String]) -> bool {
        !needed.is_empty() && needed.iter().all(|c| self.has_column(c))
    }
}

/// Planner-side statistics and clauses of one base relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub id: RelId,
    pub name: String,
    pub pages: f64,
    pub tuples: f64,
    /// Estimated output rows after the base filters.
    pub rows: f64,
    pub width: u32,
    #[serde(default)]
    pub all_visible_frac: f64,
    #[serde(default)]
    pub indexes: Vec<IndexCandidate>,
    #[serde(default)]
    pub base_restrict: Vec<Clause>,
    #[serde(default)]
    pub join_clauses: Vec<Clause>,
    #[serde(default)]
    pub has_eclass_joins: bool,
    #[serde(default)]
    pub eclass_indexes: Vec<usize>,
    /// Columns the query needs from this relation.
    #[serde(default)]
    pub target_columns: Vec<String>,
    /// Orderings that are useful to the rest of the query.
    #[serde(default)]
    pub query_pathkeys: Vec<String>,
}

impl RelationInfo {
    pub fn index(&self, id: IndexId) -> Option<&IndexCandidate> {
        self.indexes.iter().find(|i| i.id == id)
    }

    /// Rows produced when the join clauses enforceable from `param` are applied too.
    pub fn param_rows(&self, param: Option<&RelSet>) -> f64 {
        match param {
            None => self.rows,
            Some(outer) => {
                let selectivity: f64 = self
                    .join_clauses
                    .iter()
                    .filter(|c| c.outer_rels.as_ref().is_some_and(|o| o.is_subset_of(outer)))
                    .map(|c| c.selectivity)
                    .product();
                self.rows * selectivity
            }
        }
    }

    /// Join clauses that a path parameterized by `param` can enforce.
    pub fn movable_join_clauses<'a>(
        &'a self,
        param: Option<&'a RelSet>,
    ) -> impl Iterator<Item = &'a Clause> + 'a {
        self.join_clauses.iter().filter(move |c| match (param, &c.outer_rels) {
            (Some(outer), Some(needed)) => needed.is_subset_of(outer),
            _ => false,
        })
    }

    /// Invalidate every cached clause evaluation cost of this relation.
    pub fn forget_clause_costs(&mut self) {
        self.base_restrict
            .iter_mut()
            .chain(self.join_clauses.iter_mut())
            .for_each(Clause::forget_eval_cost);
    }

    /// Build an isolated copy of this relation restricted to `filter`.
    ///
    /// `None` keeps every candidate index (a full reconsideration).
    pub fn isolate(&self, filter: Option<&[IndexId]>, allow_bitmap: bool) -> IsolatedRelation {
        let mut relation = self.clone();
        if let Some(keep) = filter {
            relation.indexes.retain(|i| keep.contains(&i.id));
        }
        IsolatedRelation {
            relation,
            allow_bitmap,
        }
    }
}

/// Private planning context handed to the candidate generator.
///
/// It carries a copy of the relation's filters, join membership, and
/// equivalence-class data, but only the chosen subset of its indexes, so
/// generation never touches the real relation.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolatedRelation {
    pub relation: RelationInfo,
    pub allow_bitmap: bool,
}

impl IsolatedRelation {
    pub fn indexes(&self) -> &[IndexCandidate] {
        &self.relation.indexes
    }

    pub fn has_indexes(&self) -> bool {
        !self.relation.indexes.is_empty()
    }
}
