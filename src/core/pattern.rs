use crate::core::Result;
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    static ref PATTERN_CACHE: Arc<Mutex<LruCache<String, Arc<Regex>>>> = Arc::new(Mutex::new(
        LruCache::new(NonZeroUsize::new(200).unwrap_or(NonZeroUsize::MIN))
    ));

    static ref EMAIL: Option<Regex> = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok();
}

/// Fast path for the built-in email format (no cache lookup)
#[inline]
pub fn is_email(text: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(text))
}

/// Get a compiled, anchored regex for a field pattern, caching by source text.
fn get_or_compile(pattern: &str) -> Result<Arc<Regex>> {
    {
        let mut cache = PATTERN_CACHE.lock()?;
        if let Some(regex) = cache.get(pattern) {
            return Ok(Arc::clone(regex));
        }
    }

    let compiled = Arc::new(Regex::new(&format!("^(?:{})$", pattern))?);

    let mut cache = PATTERN_CACHE.lock()?;
    cache.put(pattern.to_string(), Arc::clone(&compiled));
    Ok(compiled)
}

/// Whole-string match of `text` against a user-supplied field pattern.
pub fn matches_pattern(text: &str, pattern: &str) -> Result<bool> {
    let regex = get_or_compile(pattern)?;
    Ok(regex.is_match(text))
}
