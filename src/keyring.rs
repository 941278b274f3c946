//! OS keychain storage for the provider credential
//!
//! `cover-runner set-key` writes here; settings loading reads it right after
//! an explicit `apiKey` setting and before the environment fallbacks.

use keyring::Entry;
use std::sync::atomic::{AtomicBool, Ordering};

const KEYRING_SERVICE: &str = "cover-runner";
const KEYRING_USERNAME: &str = "api_key";

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

/// Keychain access is off in tests and when `COVER_RUNNER_DISABLE_KEYRING` is set.
pub fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("COVER_RUNNER_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(error = %err, "couldn't read API key from system keychain");
}

pub fn get_api_key() -> Result<Option<String>, String> {
    if keyring_disabled() {
        return Ok(None);
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(key) if key.trim().is_empty() => Ok(None),
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.to_string()),
    }
}

/// Store the key and read it back to confirm it persisted.
pub fn set_api_key(key: &str) -> Result<(), String> {
    if keyring_disabled() {
        return Err("system keychain is disabled (COVER_RUNNER_DISABLE_KEYRING)".to_string());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    entry.set_password(key).map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(stored) if stored == key => Ok(()),
        Ok(_) => Err("verification failed: stored key doesn't match".to_string()),
        Err(err) => Err(format!("verification failed: {}", err)),
    }
}
