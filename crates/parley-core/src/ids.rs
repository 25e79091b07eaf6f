use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Custom epoch for message ids: 2025-01-01T00:00:00Z, milliseconds.
/// Leaves 41 bits of timestamp headroom for ~69 years of operation.
const ID_EPOCH_MS: i64 = 1_735_689_600_000;

const NODE_BITS: u32 = 10;
const SEQ_BITS: u32 = 12;
const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQ: i64 = (1 << SEQ_BITS) - 1;

/// Allocate an opaque conversation identifier.
///
/// UUIDv7 — time-sortable, globally unique, 36 chars.
pub fn new_conversation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Snowflake-style generator for dense 64-bit message ids.
///
/// Layout: 41-bit millisecond timestamp since [`ID_EPOCH_MS`], 10-bit node
/// id, 12-bit per-millisecond sequence. One instance lives for the whole
/// server process; ids are collision-free within the process without any
/// external coordination.
pub struct MessageIdGen {
    node: i64,
    state: Mutex<IdState>,
}

struct IdState {
    last_ms: i64,
    seq: i64,
}

impl MessageIdGen {
    /// Create a generator for the given node id (wrapped into 10 bits).
    pub fn new(node: u16) -> Self {
        Self {
            node: i64::from(node) & MAX_NODE,
            state: Mutex::new(IdState { last_ms: 0, seq: 0 }),
        }
    }

    /// Allocate the next id. Positive, unique within this process.
    pub fn next(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        let mut now = epoch_ms();

        // Clock went backwards: keep allocating against the last seen
        // millisecond rather than handing out a colliding timestamp.
        if now < state.last_ms {
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.seq += 1;
            if state.seq > MAX_SEQ {
                // Sequence exhausted for this millisecond — spin to the next.
                while now <= state.last_ms {
                    now = epoch_ms();
                }
                state.seq = 0;
            }
        } else {
            state.seq = 0;
        }
        state.last_ms = now;

        ((now - ID_EPOCH_MS) << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | state.seq
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn conversation_ids_are_unique_and_short() {
        let a = new_conversation_id();
        let b = new_conversation_id();
        assert_ne!(a, b);
        assert!(a.len() <= 64);
    }

    #[test]
    fn message_ids_are_positive_and_unique() {
        let ids = MessageIdGen::new(0);
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = ids.next();
            assert!(id > 0);
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    #[test]
    fn message_ids_increase_within_a_thread() {
        let ids = MessageIdGen::new(3);
        let mut prev = ids.next();
        for _ in 0..1_000 {
            let id = ids.next();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn node_id_wraps_into_ten_bits() {
        let ids = MessageIdGen::new(u16::MAX);
        let id = ids.next();
        let node = (id >> SEQ_BITS) & MAX_NODE;
        assert_eq!(node, i64::from(u16::MAX) & MAX_NODE);
    }
}
