//! Message-aware logger.
//!
//! [`MessageLogger`] logs lines describing bus messages. It resolves the
//! message type's descriptor through the [`LogInfoCache`] and asks the sink
//! whether the level is enabled *for that message type* before rendering
//! anything, so disabled lines cost a cache lookup and nothing more.
//!
//! Templates use positional placeholders:
//!
//! | placeholder | value                          |
//! |-------------|--------------------------------|
//! | `{0}`       | rendered message text          |
//! | `{1}`       | message id (empty if none)     |
//! | `{2}`       | message size                   |
//! | `{3}`       | peer descriptor (empty if none)|
//!
//! ```rust,ignore
//! let logger = MessageLogger::get::<MyBus>();
//! logger.log_format(
//!     "SEND: {0} to {3} ({2} bytes) [{1}]",
//!     &message,
//!     LogArgs::new().message_id(id).message_size(128).peer(&peer_id),
//! );
//! ```

use std::fmt::{self, Write};
use std::sync::Arc;

use tracing::Level;

use super::cache::LogInfoCache;
use super::sink::{LogSink, default_sink};
use crate::foundation::message::{Message, MessageId};
use crate::foundation::peer::{Peer, PeerId};

/// Optional arguments of [`MessageLogger::log_format`].
#[derive(Debug, Clone, Copy)]
pub struct LogArgs<'a> {
    message_id: Option<MessageId>,
    message_size: usize,
    peer_id: Option<&'a PeerId>,
    level: Level,
}

impl Default for LogArgs<'_> {
    fn default() -> Self {
        Self {
            message_id: None,
            message_size: 0,
            peer_id: None,
            level: Level::INFO,
        }
    }
}

impl<'a> LogArgs<'a> {
    /// Creates arguments logging at INFO with no id, size or peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the message id rendered as `{1}`.
    pub fn message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Sets the message size rendered as `{2}`.
    pub fn message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    /// Sets the peer rendered as `{3}`.
    pub fn peer(mut self, peer_id: &'a PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    /// Sets the log level (default: INFO).
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

/// Logs bus messages without paying for formatting when disabled.
#[derive(Clone)]
pub struct MessageLogger {
    logger: &'static str,
    sink: Arc<dyn LogSink>,
    cache: Arc<LogInfoCache>,
}

impl MessageLogger {
    /// Returns a logger emitting under `T`'s type name, using the default
    /// sink and the global descriptor cache.
    pub fn get<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>(), default_sink())
    }

    /// Creates a logger emitting under `logger` through `sink`.
    pub fn new(logger: &'static str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            logger,
            sink,
            cache: LogInfoCache::global(),
        }
    }

    /// Uses a private descriptor cache instead of the global one.
    pub fn with_cache(mut self, cache: Arc<LogInfoCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Returns the key this logger emits under.
    pub fn logger(&self) -> &'static str {
        self.logger
    }

    /// Returns `true` if INFO is enabled for `message`'s type.
    pub fn is_log_enabled(&self, message: &dyn Message) -> bool {
        let info = self.cache.get_or_create(message);
        self.sink.is_enabled(info.logger(), Level::INFO)
    }

    /// Renders `message` the way log lines show it.
    ///
    /// Uses the global descriptor cache and ignores log levels.
    pub fn to_string(message: &dyn Message) -> String {
        LogInfoCache::global().get_or_create(message).render(message)
    }

    /// Logs `template` for `message` if `args.level` is enabled for its type.
    pub fn log_format(&self, template: &str, message: &dyn Message, args: LogArgs<'_>) {
        let info = self.cache.get_or_create(message);
        if !self.sink.is_enabled(info.logger(), args.level) {
            return;
        }

        let text = info.render(message);
        let peer = args.peer_id.map(PeerId::as_str).unwrap_or_default();
        self.emit(template, &text, args.message_id, args.message_size, peer, args.level);
    }

    /// Logs `template` for a message sent to several peers.
    ///
    /// With more than one peer, `{3}` renders as
    /// `"<first> and <n> other peer(s)"`.
    pub fn log_format_for_peers(
        &self,
        template: &str,
        message: &dyn Message,
        message_id: MessageId,
        message_size: usize,
        peers: &[Peer],
        level: Level,
    ) {
        let args = LogArgs::new()
            .message_id(message_id)
            .message_size(message_size)
            .level(level);

        match peers {
            [] => self.log_format(template, message, args),
            [peer] => self.log_format(template, message, args.peer(&peer.id)),
            _ => {
                let info = self.cache.get_or_create(message);
                if !self.sink.is_enabled(info.logger(), level) {
                    return;
                }

                let text = info.render(message);
                let peer = peer_descriptor(peers);
                self.emit(template, &text, Some(message_id), message_size, &peer, level);
            }
        }
    }

    fn emit(
        &self,
        template: &str,
        text: &str,
        message_id: Option<MessageId>,
        message_size: usize,
        peer: &str,
        level: Level,
    ) {
        let message_id = message_id.map(|id| id.to_string()).unwrap_or_default();
        let line = render_template(template, &[&text, &message_id, &message_size, &peer]);
        self.sink.log(self.logger, level, &line);
    }
}

impl fmt::Debug for MessageLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLogger")
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

/// Describes a peer list: empty, the single peer id, or
/// `"<first> and <n> other peer(s)"`.
pub fn peer_descriptor(peers: &[Peer]) -> String {
    match peers {
        [] => String::new(),
        [peer] => peer.id.to_string(),
        [first, others @ ..] => {
            let plural = if others.len() == 1 { "" } else { "s" };
            format!("{} and {} other peer{}", first.id, others.len(), plural)
        }
    }
}

/// Substitutes `{N}` placeholders with `args[N]`.
///
/// Placeholders without a matching argument are kept verbatim.
pub fn render_template(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let placeholder = after
            .find('}')
            .and_then(|close| after[..close].parse::<usize>().ok().map(|i| (i, close)))
            .and_then(|(i, close)| args.get(i).map(|arg| (arg, close)));

        match placeholder {
            Some((arg, close)) => {
                let _ = write!(out, "{arg}");
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
