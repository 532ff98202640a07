//! Caller identity handling.

/// Characters of a caller identity that may appear in logs.
const VISIBLE_CHARS: usize = 8;

/// Build the shared-store key for a caller.
///
/// The prefix namespaces limiter keys away from anything else in the store.
pub fn counter_key(prefix: &str, caller: &str) -> String {
    format!("{}{}", prefix, caller)
}

/// Shorten a caller identity (usually an API key) so it is safe to log.
pub fn mask_caller(caller: &str) -> String {
    if caller.is_empty() {
        return "<anonymous>".to_string();
    }

    let visible: String = caller.chars().take(VISIBLE_CHARS).collect();
    format!("{}...", visible)
}
