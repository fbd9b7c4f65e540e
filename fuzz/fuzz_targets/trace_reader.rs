#![no_main]

use libfuzzer_sys::fuzz_target;
use rastro::config::AnalysisConfig;
use rastro::replay::Replay;
use rastro::trace_file::TraceReader;

fuzz_target!(|data: &[u8]| {
    // Arbitrary files either fail the header or replay to a summary
    if let Ok(reader) = TraceReader::new(std::io::Cursor::new(data.to_vec())) {
        let _ = Replay::new(AnalysisConfig::default()).channel_capacity(4).run(reader);
    }
});
