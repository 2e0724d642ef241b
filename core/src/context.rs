use ahash::AHashMap as HashMap;
use std::{any::Any, fmt};

/// Reserved context key names. Reserved by convention only; nothing
/// enforces their presence or their value types.
pub mod keys {
    pub const START_TIME: &str = "start_time";
    pub const REQUEST_ID: &str = "request_id";
    pub const USER: &str = "user";
    pub const RATE_LIMIT: &str = "rate_limit";
}

/// A per-request bag of values shared across pipeline stages.
///
/// A context is never shared between requests. Middleware and the handler
/// run in sequence on one thread, so a write by an earlier stage is always
/// visible to later stages. Reads are best-effort: a missing key or a type
/// mismatch yields `None`.
#[derive(Default)]
pub struct Context {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut()
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.values.remove(key)?.downcast().ok().map(|boxed| *boxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let mut context = Context::default();
        context.insert(keys::REQUEST_ID, "req-1".to_string());
        context.insert("count", 3usize);

        assert_eq!(
            context.get::<String>(keys::REQUEST_ID),
            Some(&"req-1".to_string()),
        );
        assert_eq!(context.get::<usize>("count"), Some(&3));
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn type_mismatch_reads_as_missing() {
        let mut context = Context::default();
        context.insert("count", 3usize);
        assert_eq!(context.get::<String>("count"), None);
        assert!(context.contains("count"));
    }

    #[test]
    fn remove_returns_value() {
        let mut context = Context::default();
        context.insert("flag", true);
        assert_eq!(context.remove::<bool>("flag"), Some(true));
        assert!(context.is_empty());
    }
}
