use byteorder::{BigEndian, WriteBytesExt};
use hypocost::config::HypotheticalSettings;
use hypocost::planner::{
    Clause, IndexAccess, IndexCandidate, IndexId, JoinPath, JoinType, NodeId, NodeKind,
    PathHeader, PlanArena, PlanNode, PlannedQuery, QueryLevel, RelId, RelationInfo,
};
use hypocost::server::Request;
use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[allow(dead_code)]
pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Helper function to create the single relation every test plan scans
#[allow(dead_code)]
pub fn create_orders_relation() -> RelationInfo {
    RelationInfo {
        id: RelId(1),
        name: "orders".to_string(),
        pages: 400.0,
        tuples: 40_000.0,
        rows: 200.0,
        width: 48,
        all_visible_frac: 0.0,
        indexes: vec![
            IndexCandidate {
                id: IndexId(1),
                name: "orders_customer_idx".to_string(),
                unique: false,
                columns: vec!["customer_id".to_string()],
                pages: 110.0,
                hypothetical: false,
            },
            IndexCandidate {
                id: IndexId(2),
                name: "<16384>btree_orders_customer_id_placed_at".to_string(),
                unique: false,
                columns: vec!["customer_id".to_string(), "placed_at".to_string()],
                pages: 140.0,
                hypothetical: true,
            },
        ],
        base_restrict: vec![Clause::new("customer_id", 0.005)],
        join_clauses: Vec::new(),
        has_eclass_joins: false,
        eclass_indexes: Vec::new(),
        target_columns: vec!["customer_id".to_string(), "total".to_string()],
        query_pathkeys: Vec::new(),
    }
}

/// Helper function to create a scan header over `orders`
#[allow(dead_code)]
pub fn create_scan_header(startup: f64, total: f64, rows: f64) -> PathHeader {
    let mut header = PathHeader::for_relation(RelId(1));
    header.set_estimate(startup, total, rows);
    header.width = 48;
    header
}

/// Helper function to wrap an arena into a one-level planned query
#[allow(dead_code)]
pub fn create_planned_query(arena: PlanArena, root: NodeId) -> PlannedQuery {
    PlannedQuery {
        arena,
        relations: vec![create_orders_relation()],
        levels: vec![QueryLevel::single(root)],
        subplans: Vec::new(),
        alternatives: Vec::new(),
    }
}

/// Helper function to create a plain index scan on `orders_customer_idx`
#[allow(dead_code)]
pub fn create_index_scan_query() -> PlannedQuery {
    let mut arena = PlanArena::new();
    let root = arena.push(PlanNode::new(
        create_scan_header(0.42, 412.0, 200.0),
        NodeKind::IndexScan(IndexAccess::new(IndexId(1))),
    ));
    create_planned_query(arena, root)
}

/// Helper function to create settings with the hypothetical pass switched on
#[allow(dead_code)]
pub fn create_enabled_settings() -> HypotheticalSettings {
    HypotheticalSettings {
        enabled: true,
        seq_page_cost: 1.0,
        random_page_cost: 1.1,
        ..HypotheticalSettings::default()
    }
}

#[allow(dead_code)]
fn push_random_node(arena: &mut PlanArena, depth: usize) -> NodeId {
    if depth == 0 || fastrand::u8(0..4) == 0 {
        let total = fastrand::f64() * 1000.0;
        return arena.push(PlanNode::new(
            create_scan_header(0.0, total, 200.0),
            NodeKind::SeqScan,
        ));
    }

    let header = PathHeader::default();
    let kind = match fastrand::u8(0..6) {
        0 => NodeKind::Sort {
            subpath: push_random_node(arena, depth - 1),
            limit_tuples: 0.0,
        },
        1 => NodeKind::Material {
            subpath: push_random_node(arena, depth - 1),
        },
        2 => NodeKind::Limit {
            subpath: push_random_node(arena, depth - 1),
            offset_est: f64::from(fastrand::u8(0..10)),
            count_est: f64::from(fastrand::u8(1..50)),
        },
        3 => {
            let count = fastrand::usize(1..4);
            NodeKind::Append {
                subpaths: (0..count)
                    .map(|_| push_random_node(arena, depth - 1))
                    .collect(),
            }
        }
        4 => NodeKind::NestLoop(JoinPath {
            join_type: JoinType::Inner,
            outer: push_random_node(arena, depth - 1),
            inner: push_random_node(arena, depth - 1),
            clauses: vec![Clause::new("customer_id", 0.01)],
        }),
        _ => NodeKind::HashJoin {
            join: JoinPath {
                join_type: JoinType::Inner,
                outer: push_random_node(arena, depth - 1),
                inner: push_random_node(arena, depth - 1),
                clauses: Vec::new(),
            },
            hash_clauses: vec![Clause::new("customer_id", 0.01)],
            parallel_hash: false,
        },
    };
    arena.push(PlanNode::new(header, kind))
}

/// Helper function to build a random supported plan tree over `orders`
#[allow(dead_code)]
pub fn create_random_query(max_depth: usize) -> PlannedQuery {
    let mut arena = PlanArena::new();
    let root = push_random_node(&mut arena, max_depth);
    create_planned_query(arena, root)
}

/// Helper function to send one framed request and read the framed reply
#[allow(dead_code)]
pub async fn send_request(stream: &mut TcpStream, request: &Request) -> TestResult<Value> {
    let payload = rmp_serde::to_vec_named(request)?;

    let mut message = Vec::new();
    WriteBytesExt::write_u32::<BigEndian>(&mut message, u32::try_from(payload.len())?)?;
    message.extend(payload);
    stream.write_all(&message).await?;

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let response_len = u32::from_be_bytes(len_buf) as usize;

    let mut response_buf = vec![0u8; response_len];
    stream.read_exact(&mut response_buf).await?;
    Ok(rmpv::decode::read_value(&mut &response_buf[..])?)
}

/// Helper function to look up a key of a response map
#[allow(dead_code)]
pub fn response_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}
