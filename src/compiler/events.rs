//! Event logging for the code generation pipeline.
//!
//! Every stage records what it did to a shared [`EventLog`]: fragments merged while
//! scheduling a block, store/load pairs removed, phis trivialized, edges split and so on.
//! Tests use the log to check that an optimization actually fired.
//!
//! ```rust,ignore
//! use stackgen::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::EdgeSplit)
//!     .at("MAIN", 3)
//!     .message("B3 -> B5");
//!
//! println!("{}", log.summary());
//! ```

use std::fmt;

use strum::IntoEnumIterator;

/// What a stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum EventKind {
    /// A block was lowered into a single instruction sequence.
    #[strum(to_string = "block lowered")]
    BlockLowered,
    /// Fragments of a block were merged into one sequence.
    #[strum(to_string = "fragments merged")]
    FragmentsMerged,
    /// An adjacent store/load pair of one value was removed.
    #[strum(to_string = "store/load eliminated")]
    StoreLoadEliminated,
    /// A load right after a store was replaced by duplicating the stored value.
    #[strum(to_string = "load duplicated")]
    LoadDuplicated,
    /// Frame slots were assigned for a function.
    #[strum(to_string = "slots assigned")]
    SlotsAssigned,
    /// A phi node was resolved without any copy.
    #[strum(to_string = "phi trivialized")]
    PhiTrivialized,
    /// A phi node was replaced by stores and loads.
    #[strum(to_string = "phi eliminated")]
    PhiEliminated,
    /// A critical edge received its own block.
    #[strum(to_string = "edge split")]
    EdgeSplit,
    /// A function was laid out and its jumps resolved.
    #[strum(to_string = "function linked")]
    FunctionLinked,
    /// Debug location records were produced for a function.
    #[strum(to_string = "debug records emitted")]
    DebugRecordsEmitted,
    /// Free-form note from the driver.
    #[strum(to_string = "info")]
    Info,
}

impl EventKind {
    /// Returns true if events of this kind mean the emitted code got cheaper.
    #[must_use]
    pub fn is_optimization(self) -> bool {
        matches!(
            self,
            Self::FragmentsMerged
                | Self::StoreLoadEliminated
                | Self::LoadDuplicated
                | Self::PhiTrivialized
                | Self::EdgeSplit
        )
    }
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The function being compiled, if any.
    pub function: Option<String>,
    /// Index of the block the event refers to.
    pub block: Option<usize>,
    /// Details; defaults to the kind's name.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = &self.function {
            write!(f, " {function}")?;
        }
        if let Some(block) = self.block {
            write!(f, "@B{block}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Fluent construction of an [`Event`].
///
/// Created by [`EventLog::record`]. The event is appended when the builder is dropped, so
/// a bare `log.record(kind)` statement is enough.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Event,
}

impl EventBuilder<'_> {
    /// Sets the function and block.
    pub fn at(mut self, function: &str, block: usize) -> Self {
        self.event.function = Some(function.to_string());
        self.event.block = Some(block);
        self
    }

    /// Sets only the function.
    pub fn function(mut self, function: &str) -> Self {
        self.event.function = Some(function.to_string());
        self
    }

    /// Replaces the default message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.event.message = msg.into();
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let event = Event {
            kind: self.event.kind,
            function: self.event.function.take(),
            block: self.event.block.take(),
            message: std::mem::take(&mut self.event.message),
        };
        self.log.events.push(event);
    }
}

/// Append-only record of one compilation.
///
/// Appending only needs a shared reference, so every stage borrows the same log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Event {
                kind,
                function: None,
                block: None,
                message: kind.to_string(),
            },
        }
    }

    /// Records a free-form note.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Returns true if an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Counts events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// All events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Events recorded while compiling `function`.
    pub fn for_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Event> {
        self.iter()
            .filter(move |e| e.function.as_deref() == Some(function))
    }

    /// One line counting the optimizations that fired, in pipeline order.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = EventKind::iter()
            .filter(|kind| kind.is_optimization())
            .filter_map(|kind| match self.count_kind(kind) {
                0 => None,
                n => Some(format!("{n} {kind}")),
            })
            .collect();
        if parts.is_empty() {
            format!("{} events, no optimizations", self.len())
        } else {
            parts.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert!(!log.has(EventKind::EdgeSplit));
        assert_eq!(log.summary(), "0 events, no optimizations");
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        log.record(EventKind::EdgeSplit)
            .at("MAIN", 3)
            .message("B3 -> B5");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.function.as_deref(), Some("MAIN"));
        assert_eq!(event.block, Some(3));
        assert_eq!(event.to_string(), "[edge split] MAIN@B3 B3 -> B5");
    }

    #[test]
    fn test_default_message_is_kind() {
        let log = EventLog::new();
        log.record(EventKind::PhiTrivialized).function("F");
        assert_eq!(log.iter().next().unwrap().message, "phi trivialized");
    }

    #[test]
    fn test_summary_follows_pipeline_order() {
        let log = EventLog::new();
        log.record(EventKind::PhiTrivialized).at("G", 1);
        log.record(EventKind::FragmentsMerged).at("F", 0);
        log.record(EventKind::FragmentsMerged).at("F", 1);
        log.record(EventKind::BlockLowered).at("F", 0);
        log.info("done");

        assert_eq!(log.summary(), "2 fragments merged, 1 phi trivialized");
        assert_eq!(log.for_function("F").count(), 3);
        assert!(log.has(EventKind::Info));
    }
}
