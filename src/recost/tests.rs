use super::*;
use crate::config::{HypotheticalSettings, OptimizerConfig, StrategyFlags};
use crate::cost::StandardCostModel;
use crate::planner::generate::{IndexPathGenerator, PathList, StandardPathGenerator};
use crate::planner::node::{IndexAccess, NodeId, NodeKind, PathHeader, PlanArena, PlanNode};
use crate::planner::query::{
    CostedPlan, LevelId, PlannedQuery, QueryLevel, SubLinkKind, SubplanRef, SubplanSlot,
};
use crate::planner::relation::{
    Clause, IndexCandidate, IndexId, IsolatedRelation, QualCost, RelId, RelSet, RelationInfo,
};
use crate::recost::substitute::{find_replacement, select_bitmap_path, select_index_path};
use crate::session::{PlanOptions, RecordedPlanner, Session};

const EPSILON: f64 = 1e-6;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {expected}, got {actual}"
    );
}

fn create_test_index(id: u32, name: &str, columns: &[&str]) -> IndexCandidate {
    IndexCandidate {
        id: IndexId(id),
        name: name.to_string(),
        unique: false,
        columns: columns.iter().map(|c| (*c).to_string()).collect(),
        pages: 30.0,
        hypothetical: false,
    }
}

fn create_test_relation() -> RelationInfo {
    RelationInfo {
        id: RelId(1),
        name: "t".to_string(),
        pages: 100.0,
        tuples: 10_000.0,
        rows: 100.0,
        width: 32,
        all_visible_frac: 0.0,
        indexes: vec![
            create_test_index(1, "idx_a", &["a"]),
            create_test_index(2, "idx_b", &["a", "b"]),
        ],
        base_restrict: vec![Clause::new("a", 0.01)],
        join_clauses: Vec::new(),
        has_eclass_joins: false,
        eclass_indexes: Vec::new(),
        target_columns: vec!["a".to_string(), "c".to_string()],
        query_pathkeys: Vec::new(),
    }
}

fn scan_header() -> PathHeader {
    let mut header = PathHeader::for_relation(RelId(1));
    header.set_estimate(1.0, 50.0, 100.0);
    header.width = 32;
    header
}

fn create_test_query(arena: PlanArena, root: NodeId) -> PlannedQuery {
    PlannedQuery {
        arena,
        relations: vec![create_test_relation()],
        levels: vec![QueryLevel::single(root)],
        subplans: Vec::new(),
        alternatives: Vec::new(),
    }
}

fn single_node_query(kind: NodeKind) -> PlannedQuery {
    let mut arena = PlanArena::new();
    let root = arena.push(PlanNode::new(scan_header(), kind));
    create_test_query(arena, root)
}

fn test_settings() -> HypotheticalSettings {
    HypotheticalSettings {
        enabled: true,
        seq_page_cost: 1.0,
        random_page_cost: 1.1,
        ..HypotheticalSettings::default()
    }
}

fn run_pass(
    query: &mut PlannedQuery,
    table: &SubstitutionTable,
    settings: &HypotheticalSettings,
    config: &mut OptimizerConfig,
) -> RecostResult<()> {
    let model = StandardCostModel::new();
    let generator = StandardPathGenerator::default();
    let recoster = Recoster::new(&model, &generator, table, settings);
    let root = query.main_level()?.chosen;
    recoster.scribble(config, query, LevelId::MAIN, root, 0)
}

fn recost_query(query: &mut PlannedQuery, table: &SubstitutionTable) -> RecostResult<()> {
    run_pass(query, table, &test_settings(), &mut OptimizerConfig::default())
}

fn path_with(param: Option<RelSet>, pathkeys: &[&str], index_only: bool) -> PlanNode {
    let mut header = scan_header();
    header.param = param;
    header.pathkeys = pathkeys.iter().map(|k| (*k).to_string()).collect();
    let access = IndexAccess::new(IndexId(2));
    let kind = if index_only {
        NodeKind::IndexOnlyScan(access)
    } else {
        NodeKind::IndexScan(access)
    };
    PlanNode::new(header, kind)
}

fn path_list(nodes: Vec<PlanNode>) -> PathList {
    let mut list = PathList::default();
    for node in nodes {
        let id = list.arena.push(node);
        list.paths.push(id);
    }
    list
}

fn rels(ids: &[usize]) -> RelSet {
    ids.iter().map(|&id| RelId(id)).collect()
}

#[test]
fn test_register_requires_both_arguments() {
    let mut table = SubstitutionTable::new();
    assert!(matches!(
        table.register(None, Some(IndexId(1))),
        Err(RecostError::InvalidRegistration(_))
    ));
    assert!(matches!(
        table.register(Some("idx"), None),
        Err(RecostError::InvalidRegistration(_))
    ));
    assert!(table.is_empty());

    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();
    assert_eq!(table.len(), 1);
    table.reset();
    assert!(table.is_empty());
}

#[test]
fn test_lookup_first_registration_wins() {
    let rel = create_test_relation();
    let mut table = SubstitutionTable::new();
    table.register(Some("idx"), Some(IndexId(2))).unwrap();
    table.register(Some("idx_a"), Some(IndexId(1))).unwrap();
    assert_eq!(table.lookup(&rel, "idx_a").unwrap().id, IndexId(2));
    assert!(table.lookup(&rel, "pkey").is_none());

    let mut missing = SubstitutionTable::new();
    missing.register(Some("idx_a"), Some(IndexId(77))).unwrap();
    assert!(missing.lookup(&rel, "idx_a").is_none());
}

#[test]
fn test_lookup_skips_targets_the_relation_lacks() {
    let rel = create_test_relation();
    let mut table = SubstitutionTable::new();
    table.register(Some("idx"), Some(IndexId(77))).unwrap();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();

    assert_eq!(table.lookup(&rel, "idx_a").unwrap().id, IndexId(2));
    let targets = table
        .candidates(&rel, "idx_a")
        .map(|(entry, index)| (entry.search.as_str(), index.id))
        .collect::<Vec<_>>();
    assert_eq!(targets, vec![("idx_a", IndexId(2))]);

    let mut query = single_node_query(NodeKind::IndexScan(IndexAccess::new(IndexId(1))));
    recost_query(&mut query, &table).unwrap();
    let node = query.arena.get(NodeId(0)).unwrap();
    assert_eq!(node.kind.index_access().unwrap().index, IndexId(2));
}

/// Yields nothing for one index and defers to the standard generator otherwise.
struct SkippingGenerator {
    skip: IndexId,
    inner: StandardPathGenerator<StandardCostModel>,
}

impl IndexPathGenerator for SkippingGenerator {
    fn generate_index_paths(
        &self,
        relation: &IsolatedRelation,
        config: &OptimizerConfig,
    ) -> PathList {
        if relation.indexes().iter().any(|index| index.id == self.skip) {
            return PathList::default();
        }
        self.inner.generate_index_paths(relation, config)
    }
}

#[test]
fn test_unusable_registration_falls_through_to_next() {
    let query = single_node_query(NodeKind::IndexScan(IndexAccess::new(IndexId(1))));
    let rel = create_test_relation();
    let mut table = SubstitutionTable::new();
    table.register(Some("idx"), Some(IndexId(1))).unwrap();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();
    let generator = SkippingGenerator {
        skip: IndexId(1),
        inner: StandardPathGenerator::default(),
    };

    let replacement = find_replacement(
        &query.arena,
        &rel,
        NodeId(0),
        &table,
        &generator,
        &OptimizerConfig::default(),
    )
    .unwrap();
    let Some(Replacement::Path { paths, chosen }) = replacement else {
        panic!("expected a generated path, got {replacement:?}");
    };
    let node = paths.arena.get(chosen).unwrap();
    assert_eq!(node.kind.index_access().unwrap().index, IndexId(2));

    // With every registration unusable nothing is replaced.
    let mut only_first = SubstitutionTable::new();
    only_first.register(Some("idx"), Some(IndexId(1))).unwrap();
    let none = find_replacement(
        &query.arena,
        &rel,
        NodeId(0),
        &only_first,
        &generator,
        &OptimizerConfig::default(),
    )
    .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_select_prefers_equal_parameterization() {
    let paths = path_list(vec![
        path_with(None, &[], false),
        path_with(Some(rels(&[2])), &[], false),
    ]);
    let mut original = scan_header();
    original.param = Some(rels(&[2]));
    assert_eq!(select_index_path(&paths, &original, false), Some(NodeId(1)));
}

#[test]
fn test_select_matches_pathkeys_when_unparameterized() {
    let paths = path_list(vec![
        path_with(Some(rels(&[2])), &["a"], false),
        path_with(Some(rels(&[3])), &[], false),
    ]);
    let original = scan_header();
    assert_eq!(select_index_path(&paths, &original, false), Some(NodeId(1)));
}

#[test]
fn test_select_falls_back_to_subset_then_unparameterized() {
    let paths = path_list(vec![
        path_with(Some(rels(&[4])), &[], false),
        path_with(Some(rels(&[2])), &[], false),
    ]);
    let mut original = scan_header();
    original.param = Some(rels(&[2, 3]));
    assert_eq!(select_index_path(&paths, &original, false), Some(NodeId(1)));

    let paths = path_list(vec![
        path_with(Some(rels(&[3])), &[], false),
        path_with(None, &[], false),
    ]);
    original.param = Some(rels(&[2]));
    assert_eq!(select_index_path(&paths, &original, false), Some(NodeId(1)));

    let paths = path_list(vec![path_with(Some(rels(&[3])), &[], false)]);
    assert_eq!(select_index_path(&paths, &original, false), None);
}

#[test]
fn test_select_index_only_requires_index_only_candidate() {
    let paths = path_list(vec![path_with(None, &[], false), path_with(None, &[], true)]);
    let original = scan_header();
    assert_eq!(select_index_path(&paths, &original, true), Some(NodeId(1)));
    // A plain index scan may be replaced by an index-only one.
    assert_eq!(select_index_path(&paths, &original, false), Some(NodeId(0)));

    let plain_only = path_list(vec![path_with(None, &[], false)]);
    assert_eq!(select_index_path(&plain_only, &original, true), None);
}

#[test]
fn test_select_bitmap_path_order() {
    let mut list = PathList::default();
    let leaf = list.arena.push(path_with(None, &[], false));
    for param in [Some(rels(&[5])), None, Some(rels(&[2]))] {
        let mut header = scan_header();
        header.param = param;
        let id = list.arena.push(PlanNode::new(
            header,
            NodeKind::BitmapHeapScan {
                bitmapqual: leaf,
                loop_count: 1.0,
            },
        ));
        list.paths.push(id);
    }

    let mut original = scan_header();
    original.param = Some(rels(&[2, 3]));
    assert_eq!(select_bitmap_path(&list, &original), Some(NodeId(3)));
    original.param = Some(rels(&[7]));
    assert_eq!(select_bitmap_path(&list, &original), Some(NodeId(2)));
}

#[test]
fn test_index_substitution_end_to_end() {
    let mut query = single_node_query(NodeKind::IndexScan(IndexAccess::new(IndexId(1))));
    let mut table = SubstitutionTable::new();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();

    recost_query(&mut query, &table).unwrap();

    let root = query.main_level().unwrap().chosen;
    let node = query.arena.get(root).unwrap();
    assert_eq!(node.kind.index_access().unwrap().index, IndexId(2));
    assert!(matches!(node.kind, NodeKind::IndexScan(_)));
    assert_eq!(node.header.parent, Some(RelId(1)));
    assert!(node.header.total_cost > node.header.startup_cost);
    assert_eq!(node.header.rows, 100.0);
}

#[test]
fn test_unmatched_index_is_left_alone() {
    let mut query = single_node_query(NodeKind::IndexScan(IndexAccess::new(IndexId(1))));
    let mut table = SubstitutionTable::new();
    table.register(Some("pkey"), Some(IndexId(2))).unwrap();

    recost_query(&mut query, &table).unwrap();
    let node = query.arena.get(NodeId(0)).unwrap();
    assert_eq!(node.kind.index_access().unwrap().index, IndexId(1));
}

#[test]
fn test_index_only_degrades_without_index_only_candidate() {
    let mut query = single_node_query(NodeKind::IndexOnlyScan(IndexAccess::new(IndexId(1))));
    let mut table = SubstitutionTable::new();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();

    recost_query(&mut query, &table).unwrap();
    let node = query.arena.get(NodeId(0)).unwrap();
    assert!(matches!(
        &node.kind,
        NodeKind::IndexScan(access) if access.index == IndexId(2)
    ));
}

#[test]
fn test_substitution_carries_over_loop_count() {
    let mut access = IndexAccess::new(IndexId(1));
    access.loop_count = 10.0;
    let mut query = single_node_query(NodeKind::IndexScan(access));
    let mut table = SubstitutionTable::new();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();

    recost_query(&mut query, &table).unwrap();
    let access = query.arena.get(NodeId(0)).unwrap().kind.index_access().unwrap();
    assert_eq!(access.index, IndexId(2));
    assert_eq!(access.loop_count, 10.0);
}

#[test]
fn test_bitmap_substitution_replaces_tree() {
    let mut arena = PlanArena::new();
    let leaf = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::IndexScan(IndexAccess::new(IndexId(1))),
    ));
    let heap = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::BitmapHeapScan {
            bitmapqual: leaf,
            loop_count: 1.0,
        },
    ));
    let mut query = create_test_query(arena, heap);
    let mut table = SubstitutionTable::new();
    table.register(Some("idx_a"), Some(IndexId(2))).unwrap();

    recost_query(&mut query, &table).unwrap();

    let node = query.arena.get(heap).unwrap();
    let NodeKind::BitmapHeapScan { bitmapqual, .. } = node.kind else {
        panic!("expected a bitmap heap scan, got {}", node.name());
    };
    assert_ne!(bitmapqual, leaf);
    let qual = query.arena.get(bitmapqual).unwrap();
    assert_eq!(qual.kind.index_access().unwrap().index, IndexId(2));
    assert!(qual.header.total_cost > 0.0);
    assert_eq!(node.header.parent, Some(RelId(1)));
}

#[test]
fn test_bitmap_leaf_is_not_substituted_alone() {
    let mut arena = PlanArena::new();
    let leaf = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::IndexScan(IndexAccess::new(IndexId(1))),
    ));
    let heap = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::BitmapHeapScan {
            bitmapqual: leaf,
            loop_count: 1.0,
        },
    ));
    let mut query = create_test_query(arena, heap);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let qual = query.arena.get(leaf).unwrap();
    let access = qual.kind.index_access().unwrap();
    assert_eq!(access.index, IndexId(1));
    // The heap scan starts once the whole bitmap is built.
    let heap = query.arena.header(heap).unwrap();
    assert_close(
        heap.startup_cost,
        access.index_total_cost + 0.1 * 0.0025 * qual.header.rows,
    );
    assert!(heap.total_cost > heap.startup_cost);
}

#[test]
fn test_unsupported_node_rejected_and_config_restored() {
    let mut arena = PlanArena::new();
    let tid = arena.push(PlanNode::new(scan_header(), NodeKind::TidScan));
    let root = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::Limit {
            subpath: tid,
            offset_est: 0.0,
            count_est: 10.0,
        },
    ));
    let mut query = create_test_query(arena, root);

    let mut config = OptimizerConfig {
        seq_page_cost: 3.0,
        random_page_cost: 9.0,
        flags: StrategyFlags {
            enable_seqscan: false,
            ..StrategyFlags::default()
        },
        ..OptimizerConfig::default()
    };
    let before = config.clone();

    let err = run_pass(&mut query, &SubstitutionTable::new(), &test_settings(), &mut config)
        .unwrap_err();
    assert_eq!(err, RecostError::UnsupportedNode("Tid Scan"));
    assert_eq!(config, before);
}

#[test]
fn test_depth_limit() {
    let mut arena = PlanArena::new();
    let scan = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let sort = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::Sort {
            subpath: scan,
            limit_tuples: 0.0,
        },
    ));
    let root = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::Material { subpath: sort },
    ));
    let mut query = create_test_query(arena, root);
    let settings = HypotheticalSettings {
        max_depth: 1,
        ..test_settings()
    };

    let err = run_pass(
        &mut query,
        &SubstitutionTable::new(),
        &settings,
        &mut OptimizerConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, RecostError::DepthExceeded { depth: 2, limit: 1 });
}

#[test]
fn test_hypothetical_page_costs_used_and_restored() {
    let mut query = single_node_query(NodeKind::SeqScan);
    let settings = HypotheticalSettings {
        seq_page_cost: 2.0,
        ..test_settings()
    };
    let mut config = OptimizerConfig {
        flags: StrategyFlags {
            enable_seqscan: false,
            ..StrategyFlags::default()
        },
        ..OptimizerConfig::default()
    };
    let before = config.clone();

    run_pass(&mut query, &SubstitutionTable::new(), &settings, &mut config).unwrap();

    // 100 pages at 2.0 plus (0.01 + 0.0025) per tuple; seq scans are re-enabled.
    let header = query.arena.header(NodeId(0)).unwrap();
    assert_close(header.total_cost, 200.0 + 0.0125 * 10_000.0);
    assert_eq!(config, before);
}

#[test]
fn test_recost_is_idempotent() {
    let mut query = single_node_query(NodeKind::IndexScan(IndexAccess::new(IndexId(1))));
    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let first = query.clone();
    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    assert_eq!(query, first);
}

#[test]
fn test_degenerate_append_adopts_child() {
    let mut arena = PlanArena::new();
    let mut header = scan_header();
    header.pathkeys = vec!["a".to_string()];
    let scan = arena.push(PlanNode::new(header, NodeKind::SeqScan));
    let root = arena.push(PlanNode::new(
        PathHeader::default(),
        NodeKind::Append {
            subpaths: vec![scan],
        },
    ));
    let mut query = create_test_query(arena, root);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let child = query.arena.header(scan).unwrap().clone();
    let append = query.arena.header(root).unwrap();
    assert_eq!(append.startup_cost, child.startup_cost);
    assert_eq!(append.total_cost, child.total_cost);
    assert_eq!(append.rows, child.rows);
    assert_eq!(append.pathkeys, vec!["a".to_string()]);
}

#[test]
fn test_append_sums_children() {
    let mut arena = PlanArena::new();
    let left = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let right = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let root = arena.push(PlanNode::new(
        PathHeader::default(),
        NodeKind::Append {
            subpaths: vec![left, right],
        },
    ));
    let mut query = create_test_query(arena, root);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let child = query.arena.header(left).unwrap().clone();
    let append = query.arena.header(root).unwrap();
    assert_close(
        append.total_cost,
        2.0 * child.total_cost + 0.01 * 0.5 * 2.0 * child.rows,
    );
    assert_eq!(append.rows, 2.0 * child.rows);
}

#[test]
fn test_limit_rows_and_costs() {
    let input = crate::cost::InputCost {
        startup: 10.0,
        total: 110.0,
        rows: 1000.0,
        width: 8,
    };

    let limited = adjust_limit_rows_costs(input, 0.0, 10.0);
    assert_close(limited.startup, 10.0);
    assert_close(limited.total, 11.0);
    assert_eq!(limited.rows, 10.0);

    let offset = adjust_limit_rows_costs(input, 100.0, 0.0);
    assert_close(offset.startup, 20.0);
    assert_close(offset.total, 110.0);
    assert_eq!(offset.rows, 900.0);

    // Unknown counts are taken as ten percent of the input.
    let unknown = adjust_limit_rows_costs(input, 0.0, -1.0);
    assert_close(unknown.total, 20.0);
    assert_eq!(unknown.rows, 100.0);
}

#[test]
fn test_projection_over_non_projecting_child() {
    let mut arena = PlanArena::new();
    let scan = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let sort = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::Sort {
            subpath: scan,
            limit_tuples: 0.0,
        },
    ));
    let mut header = scan_header();
    header.target = QualCost::new(1.0, 0.01);
    let root = arena.push(PlanNode::new(
        header,
        NodeKind::Projection {
            subpath: sort,
            dummy: false,
        },
    ));
    let mut query = create_test_query(arena, root);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let child = query.arena.header(sort).unwrap().clone();
    let projection = query.arena.header(root).unwrap();
    assert_close(projection.startup_cost, child.startup_cost + 1.0);
    assert_close(
        projection.total_cost,
        child.total_cost + 1.0 + (0.01 + 0.01) * child.rows,
    );
}

#[test]
fn test_dummy_projection_only_adds_target_delta() {
    let mut arena = PlanArena::new();
    let scan = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let root = arena.push(PlanNode::new(
        scan_header(),
        NodeKind::Projection {
            subpath: scan,
            dummy: true,
        },
    ));
    let mut query = create_test_query(arena, root);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let child = query.arena.header(scan).unwrap().clone();
    let projection = query.arena.header(root).unwrap();
    assert_close(projection.startup_cost, child.startup_cost);
    assert_close(projection.total_cost, child.total_cost);
}

/// Main level scanning `t`, plus a result-only level 1 used as a subplan.
fn create_subplan_query(kind: SubLinkKind, init: bool) -> PlannedQuery {
    let mut arena = PlanArena::new();
    let root = arena.push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    let sub_header = PathHeader {
        rows: 50.0,
        ..PathHeader::default()
    };
    let sub = arena.push(PlanNode::new(sub_header, NodeKind::ResultScan));
    let sub_plan = CostedPlan::from_node(sub, arena.get(sub).unwrap());

    let mut main = QueryLevel::single(root);
    let reference = SubplanRef::new(1, kind);
    if init {
        main.init_plans.push(reference);
    } else {
        main.noninit_plans.push(reference);
    }
    let mut query = create_test_query(arena, root);
    query.levels = vec![main, QueryLevel::single(sub)];
    query.subplans = vec![SubplanSlot {
        level: LevelId(1),
        plan: Some(sub_plan),
    }];
    query
}

#[test]
fn test_init_plan_charged_into_root() {
    let mut with_init = create_subplan_query(SubLinkKind::Expr, true);
    let mut without = create_subplan_query(SubLinkKind::Expr, true);
    without.levels[0].init_plans.clear();

    recost_query(&mut with_init, &SubstitutionTable::new()).unwrap();
    recost_query(&mut without, &SubstitutionTable::new()).unwrap();

    let charge = with_init.levels[0].init_plans[0].charge();
    // Result over 50 rows: 0.5 run, plus one operator per call.
    assert_close(charge, 0.5 + 0.0025);
    let plain = without.arena.header(NodeId(0)).unwrap();
    let charged = with_init.arena.header(NodeId(0)).unwrap();
    assert_close(charged.startup_cost, plain.startup_cost + charge);
    assert_close(charged.total_cost, plain.total_cost + charge);
}

#[test]
fn test_noninit_plan_is_not_charged_into_root() {
    let mut query = create_subplan_query(SubLinkKind::Expr, false);
    let mut baseline = create_subplan_query(SubLinkKind::Expr, false);
    baseline.levels[0].noninit_plans.clear();

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    recost_query(&mut baseline, &SubstitutionTable::new()).unwrap();
    assert_eq!(
        query.arena.header(NodeId(0)).unwrap().total_cost,
        baseline.arena.header(NodeId(0)).unwrap().total_cost
    );
    assert!(query.levels[0].noninit_plans[0].per_call_cost > 0.0);
}

#[test]
fn test_discarded_subplan_is_skipped() {
    let mut query = create_subplan_query(SubLinkKind::Expr, true);
    query.subplans[0].plan = None;
    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    assert!(query.subplans[0].plan.is_none());
    assert_eq!(query.levels[0].init_plans[0].charge(), 0.0);
}

/// Level 1 offers a fast-start path and a cheaper-total path.
fn create_fractional_query(kind: SubLinkKind) -> PlannedQuery {
    let mut query = create_subplan_query(kind, false);
    let fast_start = NodeId(1);
    query.arena.get_mut(fast_start).unwrap().header.rows = 1000.0;

    let header = PathHeader {
        rows: 10.0,
        target: QualCost::new(8.0, 0.0),
        ..PathHeader::default()
    };
    let cheap_total = query.arena.push(PlanNode::new(header, NodeKind::ResultScan));
    query.levels[1].paths.push(cheap_total);
    query
}

#[test]
fn test_exists_subplan_prefers_fast_start() {
    let mut query = create_fractional_query(SubLinkKind::Exists);
    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    assert_eq!(query.levels[1].cheapest_total, NodeId(2));
    assert_eq!(query.levels[1].chosen, NodeId(1));
    assert_eq!(query.subplans[0].plan.as_ref().unwrap().root, NodeId(1));
}

#[test]
fn test_expr_subplan_takes_cheapest_total() {
    let mut query = create_fractional_query(SubLinkKind::Expr);
    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    assert_eq!(query.levels[1].chosen, NodeId(2));
    assert_close(query.subplans[0].plan.as_ref().unwrap().total_cost, 8.1);
}

#[test]
fn test_cte_adds_nested_subplan_charges() {
    let mut query = create_subplan_query(SubLinkKind::Cte, false);
    let nested_header = PathHeader {
        rows: 20.0,
        ..PathHeader::default()
    };
    let nested = query
        .arena
        .push(PlanNode::new(nested_header, NodeKind::ResultScan));
    query.levels.push(QueryLevel::single(nested));
    query.subplans.push(SubplanSlot {
        level: LevelId(2),
        plan: Some(CostedPlan::from_node(nested, query.arena.get(nested).unwrap())),
    });
    query.levels[1]
        .init_plans
        .push(SubplanRef::new(2, SubLinkKind::Expr));

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();

    let nested_charge = query.levels[1].init_plans[0].charge();
    assert_close(nested_charge, 0.2 + 0.0025);
    let cte = query.subplans[0].plan.as_ref().unwrap();
    let own = query.arena.header(NodeId(1)).unwrap();
    assert_close(cte.startup_cost, own.startup_cost + nested_charge);
    assert_close(cte.total_cost, own.total_cost + nested_charge);
}

#[test]
fn test_cte_scan_uses_subplan_output() {
    let mut query = create_subplan_query(SubLinkKind::Cte, false);
    let header = PathHeader {
        rows: 50.0,
        ..PathHeader::default()
    };
    query.arena.get_mut(NodeId(0)).unwrap().kind = NodeKind::CteScan { plan_id: 1 };
    query.arena.get_mut(NodeId(0)).unwrap().header = header;
    query.relations.clear();

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let scan = query.arena.header(NodeId(0)).unwrap();
    assert_eq!(scan.rows, 50.0);
    assert_close(scan.total_cost, 0.01 * 50.0);
}

#[test]
fn test_subquery_scan_runs_nested_pass() {
    let mut query = create_subplan_query(SubLinkKind::Expr, false);
    query.levels[0].noninit_plans.clear();
    query.subplans.clear();
    let inner = query
        .arena
        .push(PlanNode::new(scan_header(), NodeKind::SeqScan));
    query.levels[1] = QueryLevel::single(inner);
    let root = query.arena.push(PlanNode::new(
        PathHeader::default(),
        NodeKind::SubqueryScan {
            subpath: inner,
            level: LevelId(1),
        },
    ));
    query.levels[0] = QueryLevel::single(root);

    recost_query(&mut query, &SubstitutionTable::new()).unwrap();
    let inner_header = query.arena.header(inner).unwrap().clone();
    let scan = query.arena.header(root).unwrap();
    assert!(inner_header.total_cost > 0.0);
    assert!(scan.total_cost >= inner_header.total_cost);
}

#[test]
fn test_validity_mask() {
    let mut query = create_subplan_query(SubLinkKind::Expr, false);
    query.subplans.push(SubplanSlot {
        level: LevelId(1),
        plan: None,
    });
    let mask = SubplanValidityMask::from_query(&query);
    assert_eq!(mask.as_slice(), &[true, false]);
    assert!(mask.is_valid(1));
    assert!(!mask.is_valid(2));
    assert!(!mask.is_valid(0));
    assert!(!mask.is_valid(3));
}

fn create_alternatives_query() -> PlannedQuery {
    let mut query = create_subplan_query(SubLinkKind::Any, false);
    let slot = query.subplans[0].clone();
    query.subplans.push(slot);
    let mut hashed = SubplanRef::new(2, SubLinkKind::Any);
    hashed.use_hash_table = true;
    hashed.startup_cost = 1.0;
    query.levels[0].noninit_plans[0].per_call_cost = 5.0;
    query.levels[0].noninit_plans.push(hashed);
    query.alternatives = vec![vec![1, 2]];
    query
}

#[test]
fn test_picker_prefers_valid_alternative() {
    let mut query = create_alternatives_query();
    let mask = SubplanValidityMask::from_query(&query);
    assert_eq!(pick_alternatives(&mut query, &mask), vec![1]);
    assert!(query.subplans[1].plan.is_none());
    assert_eq!(query.levels[0].noninit_plans.len(), 1);
    assert_eq!(query.levels[0].noninit_plans[0].plan_id, 1);
}

#[test]
fn test_picker_falls_back_to_cheapest() {
    let mut query = create_alternatives_query();
    let mask = SubplanValidityMask::default();
    assert_eq!(pick_alternatives(&mut query, &mask), vec![2]);
    assert!(query.subplans[0].plan.is_none());
    assert_eq!(query.levels[0].noninit_plans[0].plan_id, 2);
}

#[test]
fn test_session_keeps_the_alternative_the_real_plan_used() {
    let mut planner = RecordedPlanner::new();
    planner.record("q", create_alternatives_query());
    let settings = HypotheticalSettings {
        enabled: true,
        ..HypotheticalSettings::default()
    };
    let mut session = Session::new(OptimizerConfig::default(), settings);
    let outcome = session
        .plan(&mut planner, "q", PlanOptions { explain: true })
        .unwrap();

    assert_eq!(outcome.validity.unwrap().as_slice(), &[true, true]);
    assert!(outcome.real.subplans.iter().all(|slot| slot.plan.is_some()));
    let hypothetical = outcome.hypothetical.unwrap();
    assert!(hypothetical.subplans[0].plan.is_some());
    assert!(hypothetical.subplans[1].plan.is_none());
    assert_eq!(hypothetical.levels[0].noninit_plans.len(), 1);
    assert_eq!(hypothetical.levels[0].noninit_plans[0].plan_id, 1);
}

#[test]
fn test_composition_table() {
    assert_eq!(Composition::of(&NodeKind::SeqScan), Composition::Scan);
    assert_eq!(
        Composition::of(&NodeKind::Memoize { subpath: NodeId(0) }),
        Composition::SingleChild
    );
    assert_eq!(
        Composition::of(&NodeKind::ModifyTable { subpath: NodeId(0) }),
        Composition::Unsupported
    );
    assert_eq!(
        Composition::of(&NodeKind::BitmapOr {
            quals: Vec::new(),
            selectivity: 1.0
        }),
        Composition::BitmapTree
    );
}
