#![no_main]

use libfuzzer_sys::fuzz_target;
use who_is_spy_client::protocol::ClientEvent;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = serde_json::from_slice::<ClientEvent>(data) {
        // Anything that decodes must encode again.
        let encoded = serde_json::to_string(&event).unwrap();
        let again: ClientEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, again);
    }
});
