#![no_main]

use libfuzzer_sys::fuzz_target;
use who_is_spy_client::phase::{GameState, PunishmentRule};
use who_is_spy_client::protocol::ServerEvent;

fuzz_target!(|data: &[u8]| {
    // Newline-separated frames drive one state machine, so decoded events
    // also exercise every transition.
    let mut state = GameState::with_rule(PunishmentRule::LosersPunished);
    for line in data.split(|b| *b == b'\n') {
        if let Ok(event) = serde_json::from_slice::<ServerEvent>(line) {
            let _ = state.apply(&event);
            let _ = state.is_local_alive();
        }
    }
    let _ = state.request_leave();
});
