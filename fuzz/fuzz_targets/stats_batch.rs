#![no_main]

use libfuzzer_sys::fuzz_target;
use rastro::session::SessionContext;
use rastro::stats::{decode_stats_batch, StatsProvider};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, never panic
    let _ = decode_stats_batch(data, 0);

    // A rejected batch must leave the thread cursor untouched
    let mut stats = StatsProvider::new(SessionContext::new(0, 1_000, 1));
    if stats.apply_batch(1, data, None).is_err() {
        assert_eq!(stats.last_cycle(1), 0);
        assert_eq!(stats.stats().count(), 0);
    }
});
