use crate::config::HypotheticalSettings;
use crate::explain::ExplainFormat;
use crate::planner::query::PlannedQuery;
use crate::planner::relation::IndexId;
use crate::session::{RecordedPlanner, Session};
use byteorder::{BigEndian, WriteBytesExt};
use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Everything one server instance shares between its clients.
#[derive(Default)]
pub struct ServerState {
    pub session: Session,
    pub planner: RecordedPlanner,
}

impl ServerState {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            planner: RecordedPlanner::new(),
        }
    }
}

/// One client request, a MessagePack map tagged by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Register {
        search: Option<String>,
        index: Option<u32>,
    },
    Reset,
    Record {
        name: String,
        plan: PlannedQuery,
    },
    Configure {
        settings: HypotheticalSettings,
    },
    Explain {
        name: String,
        #[serde(default)]
        format: ExplainFormat,
    },
}

pub async fn start_server(state: Arc<Mutex<ServerState>>, address: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    log::info!("hypocost server listening on {address}");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(state, stream).await {
                log::error!("Client error: {e}");
            }
        });
    }
}

async fn handle_client(state: Arc<Mutex<ServerState>>, stream: TcpStream) -> anyhow::Result<()> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    log::debug!("client {peer} connected");

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let msg_len = u32::from_be_bytes(len_buf) as usize;

        let mut buffer = vec![0u8; msg_len];
        if reader.read_exact(&mut buffer).await.is_err() {
            break;
        }

        let response = process_message(&state, &buffer).await.unwrap_or_else(|err| {
            log::warn!("Failed to process message from {peer}: {err}");
            error_value(&err)
        });
        write_half.write_all(&encode_frame(&response)?).await?;
    }

    log::debug!("client {peer} disconnected");
    Ok(())
}

async fn process_message(state: &Arc<Mutex<ServerState>>, message: &[u8]) -> anyhow::Result<Value> {
    let request: Request = rmp_serde::from_slice(message)?;
    let mut state = state.lock().await;
    handle_request(&mut state, request)
}

/// Apply `request` to the shared state and build the response map.
pub fn handle_request(state: &mut ServerState, request: Request) -> anyhow::Result<Value> {
    match request {
        Request::Register { search, index } => {
            state
                .session
                .register(search.as_deref(), index.map(IndexId))?;
            let count = state.session.substitutions().len();
            Ok(response("registered", Value::from(count as u64)))
        }
        Request::Reset => {
            state.session.reset();
            Ok(response("reset", Value::Boolean(true)))
        }
        Request::Record { name, plan } => {
            state.planner.record(name.clone(), plan);
            Ok(response("recorded", Value::from(name)))
        }
        Request::Configure { settings } => {
            settings.validate().map_err(anyhow::Error::msg)?;
            state.session.settings = settings;
            Ok(response("configured", Value::Boolean(true)))
        }
        Request::Explain { name, format } => {
            let ServerState { session, planner } = state;
            let document = session.explain(planner, name.as_str())?;
            Ok(response("explanation", Value::from(document.render(format)?)))
        }
    }
}

fn response(key: &str, value: Value) -> Value {
    Value::Map(vec![(Value::from(key), value)])
}

fn error_value(err: &anyhow::Error) -> Value {
    response("error", Value::from(err.to_string()))
}

/// Length-prefix a MessagePack value with its big-endian u32 size.
pub fn encode_frame(value: &Value) -> anyhow::Result<Vec<u8>> {
    let mut payload = Vec::new();
    rmpv::encode::write_value(&mut payload, value)?;

    let mut out: Vec<u8> = Vec::new();
    WriteBytesExt::write_u32::<BigEndian>(&mut out, u32::try_from(payload.len())?)?;
    out.extend(payload);
    Ok(out)
}
