//! Process-wide adapter registry.
//!
//! Maps source-type tags to adapter factories. Populated once at startup
//! and read-only afterwards, so concurrent lookups need no lock; `get`
//! builds a fresh adapter instance per call.

use std::collections::BTreeMap;

use crate::config::Settings;

use super::chat_mention::ChatMentionAdapter;
use super::comment_email::CommentEmailAdapter;
use super::{AdapterError, SourceAdapter};

type AdapterFactory = Box<dyn Fn() -> Box<dyn SourceAdapter> + Send + Sync>;

/// Name-to-factory map for source adapters.
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with both built-in adapters registered.
    pub fn with_defaults(settings: Settings) -> Self {
        let mut registry = Self::new();

        let chat_settings = settings.clone();
        registry.register("chat_mention", move || {
            Box::new(ChatMentionAdapter::new(chat_settings.clone()))
        });
        registry.register("comment_email", move || {
            Box::new(CommentEmailAdapter::new(settings.clone()))
        });

        registry
    }

    /// Register a factory for a source-type tag.
    ///
    /// A later registration for the same tag overwrites the earlier one.
    pub fn register(
        &mut self,
        source_type: &str,
        factory: impl Fn() -> Box<dyn SourceAdapter> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(source_type.to_string(), Box::new(factory));
    }

    /// Build a fresh adapter for the tag.
    ///
    /// Unknown tags fail with a message listing the registered tags.
    pub fn get(&self, source_type: &str) -> Result<Box<dyn SourceAdapter>, AdapterError> {
        match self.factories.get(source_type) {
            Some(factory) => Ok(factory()),
            None => Err(AdapterError::UnknownSourceType {
                requested: source_type.to_string(),
                available: self.tags().join(", "),
            }),
        }
    }

    /// Registered source-type tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_both_adapters() {
        let registry = AdapterRegistry::with_defaults(Settings::default());
        assert_eq!(registry.tags(), vec!["chat_mention", "comment_email"]);

        let adapter = registry.get("chat_mention").unwrap();
        assert_eq!(adapter.source_type(), "chat_mention");
    }

    #[test]
    fn get_returns_a_fresh_instance_each_call() {
        let registry = AdapterRegistry::with_defaults(Settings::default());
        let a = registry.get("comment_email").unwrap();
        let b = registry.get("comment_email").unwrap();
        assert!(!std::ptr::eq(a.as_ref(), b.as_ref()));
    }

    #[test]
    fn unknown_tag_lists_available_tags() {
        let registry = AdapterRegistry::with_defaults(Settings::default());
        let err = registry.get("carrier_pigeon").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("carrier_pigeon"));
        assert!(message.contains("chat_mention"));
        assert!(message.contains("comment_email"));
    }

    #[test]
    fn later_registration_overwrites() {
        let mut registry = AdapterRegistry::with_defaults(Settings::default());
        registry.register("chat_mention", || {
            Box::new(ChatMentionAdapter::new(Settings {
                chat_client_id: Some("override".to_string()),
                ..Default::default()
            }))
        });
        assert_eq!(registry.tags().len(), 2);
    }
}
