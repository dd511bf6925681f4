//! Per-message-type log descriptors.
//!
//! Resolving how a message type is logged (its logger key, its short name and
//! whether it has a custom representation) is done once per concrete type and
//! cached in a [`LogInfoCache`].

use std::any::TypeId;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::foundation::message::Message;

static GLOBAL_CACHE: LazyLock<Arc<LogInfoCache>> = LazyLock::new(|| Arc::new(LogInfoCache::new()));

/// Immutable log descriptor of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeLogInfo {
    logger: &'static str,
    type_name: String,
    has_display: bool,
}

impl MessageTypeLogInfo {
    /// Builds the descriptor of `message`'s concrete type.
    pub fn from_message(message: &dyn Message) -> Self {
        let logger = message.message_type_name();
        Self {
            logger,
            type_name: pretty_type_name(logger),
            has_display: message.display().is_some(),
        }
    }

    /// Returns the logger key (the full type name).
    pub fn logger(&self) -> &'static str {
        self.logger
    }

    /// Returns the short type name used in log lines.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns `true` if the type has a custom representation.
    pub fn has_display(&self) -> bool {
        self.has_display
    }

    /// Renders `message` as `TypeName` or `TypeName {representation}`.
    pub fn render(&self, message: &dyn Message) -> String {
        match message.display() {
            Some(display) if self.has_display => format!("{} {{{}}}", self.type_name, display),
            _ => self.type_name.clone(),
        }
    }
}

/// Concurrent cache of [`MessageTypeLogInfo`] keyed by concrete message type.
///
/// Concurrent first lookups of the same type may each build a descriptor,
/// but only one is stored and every caller gets the stored one.
#[derive(Debug, Default)]
pub struct LogInfoCache {
    infos: DashMap<TypeId, Arc<MessageTypeLogInfo>>,
}

impl LogInfoCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide cache.
    pub fn global() -> Arc<LogInfoCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Returns the descriptor of `message`'s type, creating it on first use.
    pub fn get_or_create(&self, message: &dyn Message) -> Arc<MessageTypeLogInfo> {
        let type_id = message.concrete_type_id();
        if let Some(info) = self.infos.get(&type_id) {
            return Arc::clone(info.value());
        }

        let entry = self
            .infos
            .entry(type_id)
            .or_insert_with(|| Arc::new(MessageTypeLogInfo::from_message(message)));
        Arc::clone(entry.value())
    }

    /// Returns the number of cached message types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns `true` if no type has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Strips module paths from a type name, including inside generic arguments.
///
/// `alloc::vec::Vec<my_app::Order>` becomes `Vec<Order>`.
pub fn pretty_type_name(full_name: &str) -> String {
    let mut pretty = String::with_capacity(full_name.len());
    let mut segment_start = 0;
    let mut chars = full_name.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                pretty.truncate(segment_start);
            }
            c if c.is_alphanumeric() || c == '_' => pretty.push(c),
            c => {
                pretty.push(c);
                segment_start = pretty.len();
            }
        }
    }

    pretty
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::fmt;

    struct Plain;

    impl Message for Plain {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Described(u32);

    impl fmt::Display for Described {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Value: {}", self.0)
        }
    }

    impl Message for Described {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn display(&self) -> Option<&dyn fmt::Display> {
            Some(self)
        }
    }

    #[test]
    fn test_pretty_type_name() {
        assert_eq!(pretty_type_name("app::orders::PlaceOrder"), "PlaceOrder");
        assert_eq!(
            pretty_type_name("app::Envelope<alloc::vec::Vec<app::Item>, u8>"),
            "Envelope<Vec<Item>, u8>"
        );
        assert_eq!(pretty_type_name("Plain"), "Plain");
        assert_eq!(pretty_type_name("&app::Ref"), "&Ref");
    }

    #[test]
    fn test_render_without_representation() {
        let info = MessageTypeLogInfo::from_message(&Plain);
        assert!(!info.has_display());
        assert_eq!(info.render(&Plain), "Plain");
    }

    #[test]
    fn test_render_with_representation() {
        let message = Described(3);
        let info = MessageTypeLogInfo::from_message(&message);
        assert!(info.has_display());
        assert_eq!(info.render(&message), "Described {Value: 3}");
    }

    #[test]
    fn test_cache_is_keyed_by_type() {
        let cache = LogInfoCache::new();
        let first = cache.get_or_create(&Described(1));
        let second = cache.get_or_create(&Described(2));
        cache.get_or_create(&Plain);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_descriptor() {
        let cache = Arc::new(LogInfoCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_create(&Described(i)))
            })
            .collect();

        let infos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.len(), 1);
        assert!(infos.iter().all(|info| Arc::ptr_eq(info, &infos[0])));
    }
}
