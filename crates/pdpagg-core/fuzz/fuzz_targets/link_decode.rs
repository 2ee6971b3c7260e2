#![no_main]
use ciborium::de::from_reader;
use libfuzzer_sys::fuzz_target;
use pdpagg_core::{Aggregate, PieceLink};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(link) = s.parse::<PieceLink>() {
            assert_eq!(link.to_string().parse::<PieceLink>().ok(), Some(link));
        }
    }
    if let Ok(agg) = from_reader::<Aggregate, _>(data) {
        let _ = agg.verify();
    }
});
