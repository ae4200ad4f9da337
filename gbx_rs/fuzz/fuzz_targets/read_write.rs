#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut gbx) = gbx_rs::Gbx::read(data) {
        if let Ok(written) = gbx.write() {
            let _ = gbx_rs::Gbx::read(&written);
        }
    }
});
