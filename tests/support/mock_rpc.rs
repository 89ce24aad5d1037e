//! In-process EVM JSON-RPC server used by the integration tests. Serves a
//! deterministic fake chain whose suffix can be swapped out to simulate a
//! reorganization, and answers ERC-20 `balanceOf` both directly and through
//! a fake Multicall3 deployment.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use chainflow::multicall::engine::{tryAggregateCall, AggregateResult};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const TRY_AGGREGATE_SELECTOR: [u8; 4] = [0xbc, 0xe3, 0x8b, 0xd7];

#[derive(Debug, Clone)]
pub struct MockTransfer {
    pub block_number: u64,
    pub log_index: u64,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug)]
pub struct ChainState {
    pub head: u64,
    /// Per-block fork seed; bumping a suffix of seeds simulates a reorg.
    seeds: HashMap<u64, u8>,
    pub transfers: Vec<MockTransfer>,
    pub balances: HashMap<(Address, Address), U256>,
    pub multicall_address: Address,
    pub multicall_deploy_block: u64,
    pub aggregate_requests: u64,
    pub direct_call_requests: u64,
    pub get_logs_requests: u64,
}

impl ChainState {
    fn seed(&self, number: u64) -> u8 {
        self.seeds.get(&number).copied().unwrap_or(1)
    }

    pub fn block_hash(&self, number: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[0] = self.seed(number);
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }

    pub fn parent_hash(&self, number: u64) -> B256 {
        if number == 0 {
            B256::ZERO
        } else {
            self.block_hash(number - 1)
        }
    }

    fn transaction_hash(&self, number: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xfe;
        bytes[1] = self.seed(number);
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }

    /// Replaces every block at or above `fork_block` with a different fork.
    pub fn force_reorg(&mut self, fork_block: u64) {
        for number in fork_block..=self.head {
            let bumped = self.seed(number).wrapping_add(16);
            self.seeds.insert(number, bumped);
        }
    }

    pub fn drop_transfers_at(&mut self, block_number: u64) {
        self.transfers
            .retain(|transfer| transfer.block_number != block_number);
    }

    fn block_json(&self, number: u64, full: bool) -> Value {
        let transactions = if full {
            json!([{
                "hash": self.transaction_hash(number),
                "transactionIndex": "0x0",
                "from": Address::repeat_byte(0x11),
                "to": Address::repeat_byte(0x22),
                "value": "0x1",
                "input": "0x",
            }])
        } else {
            json!([self.transaction_hash(number)])
        };
        json!({
            "number": format!("0x{number:x}"),
            "hash": self.block_hash(number),
            "parentHash": self.parent_hash(number),
            "timestamp": format!("0x{:x}", 1_700_000_000u64 + number * 12),
            "gasUsed": "0x5208",
            "transactions": transactions,
        })
    }

    fn log_json(&self, transfer: &MockTransfer) -> Value {
        json!({
            "address": transfer.token,
            "topics": [
                chainflow::pipeline::jobs::TRANSFER_TOPIC,
                transfer.from.into_word(),
                transfer.to.into_word(),
            ],
            "data": format!("0x{}", hex::encode(transfer.value.to_be_bytes::<32>())),
            "blockNumber": format!("0x{:x}", transfer.block_number),
            "transactionHash": self.transaction_hash(transfer.block_number),
            "logIndex": format!("0x{:x}", transfer.log_index),
        })
    }

    fn balance_returndata(&self, token: Address, calldata: &[u8]) -> Vec<u8> {
        if calldata.len() != 36 || calldata[..4] != BALANCE_OF_SELECTOR {
            return Vec::new();
        }
        let holder = Address::from_slice(&calldata[16..36]);
        let balance = self
            .balances
            .get(&(token, holder))
            .copied()
            .unwrap_or(U256::ZERO);
        balance.abi_encode()
    }
}

pub struct MockEvmServer {
    addr: SocketAddr,
    state: Arc<Mutex<ChainState>>,
    handle: JoinHandle<()>,
}

impl MockEvmServer {
    pub async fn start(head: u64, multicall_address: Address, multicall_deploy_block: u64) -> Self {
        let state = Arc::new(Mutex::new(ChainState {
            head,
            seeds: HashMap::new(),
            transfers: Vec::new(),
            balances: HashMap::new(),
            multicall_address,
            multicall_deploy_block,
            aggregate_requests: 0,
            direct_call_requests: 0,
            get_logs_requests: 0,
        }));

        let service_state = state.clone();
        let make_service = make_service_fn(move |_| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle_http(state.clone(), request)
                }))
            }
        });

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            if let Err(error) = server.await {
                eprintln!("mock rpc server error: {error}");
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> Arc<Mutex<ChainState>> {
        self.state.clone()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        f(&mut self.state.lock().expect("mock state mutex poisoned"))
    }

    pub fn add_transfer(&self, transfer: MockTransfer) {
        self.with_state(|state| state.transfers.push(transfer));
    }

    pub fn set_balance(&self, token: Address, holder: Address, balance: U256) {
        self.with_state(|state| {
            state.balances.insert((token, holder), balance);
        });
    }
}

impl Drop for MockEvmServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_http(
    state: Arc<Mutex<ChainState>>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let body = hyper::body::to_bytes(request.into_body())
        .await
        .unwrap_or_default();
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let response = match parsed {
        Value::Array(requests) => Value::Array(
            requests
                .into_iter()
                .map(|request| handle_rpc(&state, request))
                .collect(),
        ),
        request => handle_rpc(&state, request),
    };

    Ok(Response::builder()
        .header("content-type", "application/json")
        .body(Body::from(response.to_string()))
        .expect("response build"))
}

fn handle_rpc(state: &Arc<Mutex<ChainState>>, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let mut state = state.lock().expect("mock state mutex poisoned");
    match dispatch(&mut state, &method, &params) {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }),
    }
}

fn dispatch(
    state: &mut ChainState,
    method: &str,
    params: &Value,
) -> Result<Value, (i64, String)> {
    match method {
        "eth_blockNumber" => Ok(json!(format!("0x{:x}", state.head))),
        "eth_getBlockByNumber" => {
            let number = parse_block_tag(state, params.get(0))?;
            let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);
            if number > state.head {
                return Ok(Value::Null);
            }
            Ok(state.block_json(number, full))
        }
        "eth_getLogs" => {
            state.get_logs_requests += 1;
            let filter = params.get(0).ok_or_else(bad_params)?;
            let from = parse_quantity(filter.get("fromBlock")).ok_or_else(bad_params)?;
            let to = parse_quantity(filter.get("toBlock")).ok_or_else(bad_params)?;
            let logs: Vec<Value> = state
                .transfers
                .iter()
                .filter(|transfer| transfer.block_number >= from && transfer.block_number <= to)
                .map(|transfer| state.log_json(transfer))
                .collect();
            Ok(Value::Array(logs))
        }
        "eth_call" => {
            let call = params.get(0).ok_or_else(bad_params)?;
            let to: Address = serde_json::from_value(call.get("to").cloned().unwrap_or_default())
                .map_err(|_| bad_params())?;
            let data = call
                .get("data")
                .and_then(Value::as_str)
                .and_then(|data| hex::decode(data.trim_start_matches("0x")).ok())
                .ok_or_else(bad_params)?;
            let block = parse_block_tag(state, params.get(1))?;
            eth_call(state, to, &data, block)
        }
        _ => Err((-32601, format!("method '{method}' not found"))),
    }
}

fn eth_call(
    state: &mut ChainState,
    to: Address,
    data: &[u8],
    block: u64,
) -> Result<Value, (i64, String)> {
    if data.len() < 4 {
        return Ok(json!("0x"));
    }

    if to == state.multicall_address && data[..4] == TRY_AGGREGATE_SELECTOR {
        state.aggregate_requests += 1;
        // Before deployment the account has no code; eth_call returns empty.
        if block < state.multicall_deploy_block {
            return Ok(json!("0x"));
        }
        let decoded = tryAggregateCall::abi_decode(data, true)
            .map_err(|error| (-32000, format!("undecodable aggregate: {error}")))?;
        let results: Vec<AggregateResult> = decoded
            .calls
            .iter()
            .map(|inner| {
                let returndata = state.balance_returndata(inner.target, &inner.callData);
                AggregateResult {
                    success: !returndata.is_empty(),
                    returnData: returndata.into(),
                }
            })
            .collect();
        return Ok(json!(format!("0x{}", hex::encode(results.abi_encode()))));
    }

    state.direct_call_requests += 1;
    let returndata = state.balance_returndata(to, data);
    Ok(json!(format!("0x{}", hex::encode(returndata))))
}

fn parse_block_tag(state: &ChainState, tag: Option<&Value>) -> Result<u64, (i64, String)> {
    match tag.and_then(Value::as_str) {
        Some("latest") | None => Ok(state.head),
        Some(hex) => u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|_| bad_params()),
    }
}

fn parse_quantity(value: Option<&Value>) -> Option<u64> {
    value
        .and_then(Value::as_str)
        .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())
}

fn bad_params() -> (i64, String) {
    (-32602, "invalid params".to_owned())
}
