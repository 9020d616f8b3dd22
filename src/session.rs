//! Session-like context supplied by the host.
//!
//! The core only needs to know whether a session is present and to set/get
//! one reserved key in it; the `{token/}` directive records its marker here
//! and an external helper (out of core scope) verifies it.

use std::collections::HashMap;

/// Reserved session key (and hidden-field name) used by `{token/}`
pub const TOKEN_KEY: &str = "csrf_token";

/// Minimal key→value session store
pub trait SessionContext {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
}

impl SessionContext for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}
