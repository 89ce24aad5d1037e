//! Size-bounded chunk planning for aggregated calls. Every chunk holds
//! calls pinned to a single block, so one `tryAggregate` request never
//! mixes block tags.

use super::call::Call;

/// ABI words framing one call inside the aggregate array: the element
/// offset, the target address word, the calldata offset and the calldata
/// length.
const CALL_FRAME_BYTES: usize = 4 * 32;

/// Fixed `tryAggregate` framing: selector, the `requireSuccess` word, the
/// array offset and array length words, doubled by hex encoding, plus the
/// `0x` prefix.
const AGGREGATE_PREAMBLE_BYTES: usize = 2 * (4 + 3 * 32) + 2;

/// Wire size of one call inside an aggregated request: the ABI frame plus
/// the 32-padded calldata, doubled by hex encoding into the JSON body.
pub(crate) fn encoded_call_bytes(call: &Call) -> usize {
    2 * (CALL_FRAME_BYTES + call.data.len().next_multiple_of(32))
}

/// Greedily packs `indices` (all pinned to the same block) into chunks
/// whose serialized request stays under `max_chunk_bytes`. A single call
/// larger than the budget still gets its own chunk; every index lands in
/// exactly one chunk.
pub(crate) fn plan_chunks(
    calls: &[Call],
    indices: &[usize],
    max_chunk_bytes: usize,
) -> Vec<Vec<usize>> {
    let budget = max_chunk_bytes.saturating_sub(AGGREGATE_PREAMBLE_BYTES);
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;

    for &index in indices {
        let call_bytes = encoded_call_bytes(&calls[index]);
        if !current.is_empty() && current_bytes + call_bytes > budget {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(index);
        current_bytes += call_bytes;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
