#![no_main]

use libfuzzer_sys::fuzz_target;
use thermobus::{DeviceProfile, RegisterId};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Loading must fail cleanly, never panic
    if let Ok(profile) = DeviceProfile::from_json_str("fuzz", text) {
        for descriptor in profile.registers() {
            assert!(descriptor.scaling != 0.0);
            let id = descriptor.id(profile.name());
            assert_eq!(id.to_string().parse::<RegisterId>().ok(), Some(id));
        }
    }

    let _ = text.parse::<RegisterId>();
});
