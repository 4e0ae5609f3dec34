//! Christian's algorithm clock synchronization (spec.md §4.7), triggered by
//! [`crate::state::ReplicaState::bump_message_counter`] reaching
//! [`crate::state::MSG_COUNT_TRIGGER`] on a non-coordinator replica.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chatline_transport::Transport;
use chatline_wire::{names, ClockResponse, Envelope};
use indicio::{clue, DEBUG, WARNING};

use crate::error::Error;
use crate::state::ReplicaState;

static COLLECTOR: indicio::Collector = indicio::Collector::new();

pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

/// spec.md §4.7 step 2: "2 s RTT cap."
pub const CLOCK_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Run one clock-sync attempt. Always resets the message counter on the way
/// out, success or failure (spec.md §4.7 step 5), and never steps any clock
/// used elsewhere in the core (SPEC_FULL.md §9 open question 2: "log +
/// record the offset... for observability").
pub fn run(state: &Arc<ReplicaState>, transport: &dyn Transport) {
    let result = attempt(state, transport);
    state.reset_message_counter();
    match result {
        Ok(offset_ns) => {
            state.record_clock_offset(offset_ns);
            clue!(COLLECTOR, DEBUG, { clock_sync: { offset_ns: offset_ns } });
        }
        Err(e) => {
            clue!(COLLECTOR, WARNING, { clock_sync_failed: e.description() });
        }
    }
}

fn attempt(state: &Arc<ReplicaState>, transport: &dyn Transport) -> Result<i64, Error> {
    // spec.md §4.7 step 1: "Resolve the coordinator's endpoint from
    // ActivePeers; abort cleanly if unknown."
    let endpoint = state.coordinator_endpoint().ok_or_else(Error::coordinator_unknown)?;
    let mut channel = transport.connect_request(&endpoint)?;

    let request = Envelope::new(names::CLOCK, chatline_wire::now_rfc3339(), state.clock.tick());
    let t0 = now_nanos();
    let reply = channel.call(chatline_wire::encode(&request), CLOCK_SYNC_TIMEOUT)?;
    let t1 = now_nanos();

    let envelope = chatline_wire::decode(&reply)?;
    state.clock.observe(envelope.clock());
    let coordinator_time = ClockResponse::from_envelope(&envelope)?.time;

    Ok(estimate_offset(coordinator_time, t0, t1))
}

/// spec.md §4.7 step 4: "Estimated coordinator time = T_c + (t1 − t0)/2.
/// The offset = estimate − t1."
pub fn estimate_offset(coordinator_time: u64, t0: u64, t1: u64) -> i64 {
    let rtt_half = (t1 - t0) / 2;
    let estimate = coordinator_time + rtt_half;
    estimate as i64 - t1 as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_clock_sync_math() {
        // spec.md §8 S6: "Coordinator returns time = 1_000_000_000 ns.
        // Requester sees t0=500 ns, t1=2500 ns. Estimated coordinator time =
        // 1_000_000_000 + 1000 = 1_000_001_000; offset = that − 2500."
        let offset = estimate_offset(1_000_000_000, 500, 2500);
        assert_eq!(1_000_001_000 - 2500, offset);
    }
}
