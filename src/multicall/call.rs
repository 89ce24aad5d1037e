use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall, SolValue};

sol! {
    function balanceOf(address account) external view returns (uint256);
}

/// Expected shape of a call's return data. Drives positional decoding after
/// the aggregated response comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutput {
    Uint256,
    Address,
    Bool,
    Utf8String,
    Raw,
}

/// Decoded return value of a resolved call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReturn {
    Uint256(U256),
    Address(Address),
    Bool(bool),
    Utf8String(String),
    Raw(Bytes),
}

impl CallReturn {
    pub fn as_uint256(&self) -> Option<U256> {
        match self {
            CallReturn::Uint256(value) => Some(*value),
            _ => None,
        }
    }
}

/// One pending `eth_call`, pinned to the block it must be evaluated at.
/// The block pin is immutable for the call's lifetime; the return slot is
/// written at most once, by the engine.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: Address,
    pub data: Bytes,
    block_number: u64,
    pub output: CallOutput,
    returns: Option<CallReturn>,
}

impl Call {
    pub fn new(target: Address, data: Bytes, block_number: u64, output: CallOutput) -> Self {
        Self {
            target,
            data,
            block_number,
            output,
            returns: None,
        }
    }

    /// ERC-20 `balanceOf(holder)` pinned to `block_number`.
    pub fn erc20_balance_of(token: Address, holder: Address, block_number: u64) -> Self {
        let data = balanceOfCall { account: holder }.abi_encode();
        Self::new(token, Bytes::from(data), block_number, CallOutput::Uint256)
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn returns(&self) -> Option<&CallReturn> {
        self.returns.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.returns.is_some()
    }

    pub(crate) fn resolve(&mut self, value: CallReturn) {
        debug_assert!(self.returns.is_none(), "call resolved twice");
        self.returns = Some(value);
    }
}

/// Decodes raw returndata against the declared output shape. `None` means
/// the bytes are not a valid encoding of that shape; the call stays
/// unresolved rather than carrying a wrong value.
pub(crate) fn decode_return(output: CallOutput, bytes: &[u8]) -> Option<CallReturn> {
    match output {
        CallOutput::Uint256 => <U256 as SolValue>::abi_decode(bytes, true)
            .ok()
            .map(CallReturn::Uint256),
        CallOutput::Address => <Address as SolValue>::abi_decode(bytes, true)
            .ok()
            .map(CallReturn::Address),
        CallOutput::Bool => <bool as SolValue>::abi_decode(bytes, true)
            .ok()
            .map(CallReturn::Bool),
        CallOutput::Utf8String => <String as SolValue>::abi_decode(bytes, true)
            .ok()
            .map(CallReturn::Utf8String),
        CallOutput::Raw => Some(CallReturn::Raw(Bytes::copy_from_slice(bytes))),
    }
}
