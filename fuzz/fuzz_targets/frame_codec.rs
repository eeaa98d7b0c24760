//! Fuzz target for inbound framing and line parsing
//!
//! Feeds arbitrary bytes through the frame codec in two chunks split at the
//! first byte's position, then parses every complete line. Nothing here may
//! panic, and the split must not change the decoded lines.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_engine::{FrameCodec, IrcLine};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 4096 {
        return;
    }

    let split = data[0] as usize % data.len();
    let mut whole = FrameCodec::default();
    let expected = whole.feed(data);

    let mut chunked = FrameCodec::default();
    let mut lines = chunked.feed(&data[..split]);
    lines.extend(chunked.feed(&data[split..]));
    assert_eq!(lines, expected);

    for line in &lines {
        if let Ok(parsed) = IrcLine::parse(line) {
            let _ = parsed.numeric();
            let _ = parsed.source_nick();
            let _ = parsed.tags();
        }
    }
});
