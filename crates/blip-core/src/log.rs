//! The logging capability the host provides.
//!
//! Named domains with a settable minimum level, observers receiving
//! formatted entries, and an object-path registry that gives each
//! `Connection` instance a small integer with a nickname, producing paths
//! like `/Connection#3/`. Modeled as an explicitly constructed [`LogSystem`]
//! value threaded through the host's API rather than a process-wide
//! singleton.
//!
//! `blip-core` itself also emits `tracing` events directly for
//! developer-facing diagnostics; `LogSystem` is reserved for the
//! host-visible entries a BLIP observer expects, mirroring a dual logging
//! idiom of internal `tracing` plus an explicit host-facing observer API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Severity of a log entry, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very low-level tracing, normally disabled.
    Debug,
    /// Verbose informational detail.
    Verbose,
    /// Routine informational messages.
    Info,
    /// Recoverable anomalies.
    Warning,
    /// Failures that abort an operation.
    Error,
    /// Disables a domain entirely.
    None,
}

/// A single log entry handed to observers.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch, supplied by the caller (the core
    /// never reads the system clock for this).
    pub timestamp_millis: u64,
    /// The domain this entry was logged under, e.g. `"BLIP"` or `"Sync"`.
    pub domain: &'static str,
    /// Severity of this entry.
    pub level: LogLevel,
    /// The object path of the instance that logged this, e.g.
    /// `/Connection#3/`, if one was assigned.
    pub object_path: Option<String>,
    /// The formatted message.
    pub message: String,
}

/// Receives formatted log entries. Implementations must not block — the
/// actor thread calls this inline.
pub trait LogObserver: Send + Sync {
    /// Called for every entry whose domain's level is at or above its
    /// severity.
    fn observe(&self, entry: &LogEntry);
}

/// Assigns each logging instance (e.g. a `Connection`) a small integer and
/// an optional parent, producing paths like `/Pusher#3/Reader#7/`.
#[derive(Debug, Default)]
pub struct ObjectPathRegistry {
    next_id: AtomicU32,
}

impl ObjectPathRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next integer, building a path from `nickname` and an
    /// optional `parent` path.
    pub fn assign(&self, nickname: &str, parent: Option<&str>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        match parent {
            Some(parent) => format!("{parent}{nickname}#{id}/"),
            None => format!("/{nickname}#{id}/"),
        }
    }
}

/// A named domain with its own minimum severity, e.g. `"BLIP"`, `"Sync"`.
struct Domain {
    min_level: LogLevel,
}

/// Explicitly constructed logging facility threaded through the host's API;
/// the core holds no process-wide singleton.
#[derive(Clone)]
pub struct LogSystem {
    domains: Arc<RwLock<HashMap<&'static str, Domain>>>,
    observers: Arc<RwLock<Vec<Arc<dyn LogObserver>>>>,
    pub(crate) paths: Arc<ObjectPathRegistry>,
}

impl Default for LogSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSystem {
    /// A `LogSystem` with no domains registered (implicitly `Info`-level
    /// until [`Self::set_level`] is called) and no observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: Arc::new(RwLock::new(HashMap::new())),
            observers: Arc::new(RwLock::new(Vec::new())),
            paths: Arc::new(ObjectPathRegistry::new()),
        }
    }

    /// Sets the minimum level a domain must reach to be observed.
    pub fn set_level(&self, domain: &'static str, level: LogLevel) {
        self.domains
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(domain, Domain { min_level: level });
    }

    /// Registers an observer. Observers are appended under a write lock;
    /// dispatch itself only takes a read lock — approximated here with a
    /// read/write lock since the core has no need for true lock freedom
    /// outside the hot ack/frame path.
    pub fn add_observer(&self, observer: Arc<dyn LogObserver>) {
        self.observers.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(observer);
    }

    /// Removes all observers pointer-equal to `observer`.
    pub fn remove_observer(&self, observer: &Arc<dyn LogObserver>) {
        let ptr = Arc::as_ptr(observer);
        self.observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|o| !std::ptr::eq(Arc::as_ptr(o), ptr));
    }

    /// Dispatches `entry` to every observer, if its domain's level admits
    /// it. Domains with no explicit level default to [`LogLevel::Info`].
    pub fn log(&self, entry: LogEntry) {
        let min_level = self
            .domains
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(entry.domain)
            .map_or(LogLevel::Info, |d| d.min_level);
        if entry.level < min_level {
            return;
        }
        for observer in
            self.observers.read().unwrap_or_else(std::sync::PoisonError::into_inner).iter()
        {
            observer.observe(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Collector(Mutex<Vec<String>>);

    impl LogObserver for Collector {
        fn observe(&self, entry: &LogEntry) {
            self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(entry.message.clone());
        }
    }

    #[test]
    fn object_paths_nest_under_parent() {
        let registry = ObjectPathRegistry::new();
        let parent = registry.assign("Connection", None);
        assert_eq!(parent, "/Connection#1/");
        let child = registry.assign("Reader", Some(&parent));
        assert_eq!(child, "/Connection#1/Reader#2/");
    }

    #[test]
    fn level_filtering_drops_below_threshold() {
        let system = LogSystem::new();
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        system.add_observer(collector.clone());
        system.set_level("BLIP", LogLevel::Warning);

        system.log(LogEntry {
            timestamp_millis: 0,
            domain: "BLIP",
            level: LogLevel::Debug,
            object_path: None,
            message: "dropped".into(),
        });
        system.log(LogEntry {
            timestamp_millis: 0,
            domain: "BLIP",
            level: LogLevel::Error,
            object_path: None,
            message: "kept".into(),
        });

        let seen = collector.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(seen.as_slice(), ["kept"]);
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let system = LogSystem::new();
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let as_observer: Arc<dyn LogObserver> = collector.clone();
        system.add_observer(as_observer.clone());
        system.remove_observer(&as_observer);

        system.log(LogEntry {
            timestamp_millis: 0,
            domain: "BLIP",
            level: LogLevel::Error,
            object_path: None,
            message: "should not arrive".into(),
        });
        assert!(collector.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_empty());
    }
}
