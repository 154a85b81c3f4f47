//! Fuzz target: parse arbitrary input as an ipcfuzz `Config` and resolve
//! every derived setting. Must not panic regardless of input.

#![no_main]

use libfuzzer_sys::fuzz_target;

use ipcfuzz::config::Config;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    if let Ok(config) = toml::from_str::<Config>(&text) {
        let _ = config.effective_send_timeout(None);
        let _ = config.effective_core_wait(None);
        let _ = config.exclusion_policy();
        let _ = config.specialization_table();
    }
});
