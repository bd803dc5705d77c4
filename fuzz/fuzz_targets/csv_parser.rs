#![no_main]
use gtfs_atlas_core::{normalize, RecordReader};
use gtfs_atlas_model::AgencyKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(agency_key) = AgencyKey::new("fuzz") else {
        return;
    };
    let Ok(reader) = RecordReader::from_reader(data, "fuzz.txt") else {
        return;
    };
    for record in reader {
        match record {
            Ok(raw) => {
                assert!(!raw.is_blank());
                let _ = normalize(raw, &agency_key);
            }
            Err(_) => break,
        }
    }
});
