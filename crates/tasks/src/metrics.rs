//! Task executor metrics, labelled by task kind.

use core::fmt;
use metrics::Counter;

/// How a task was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Critical,
    Graceful,
}

impl TaskKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Graceful => "graceful",
        }
    }
}

#[derive(Clone, Debug)]
struct KindCounters {
    spawned: Counter,
    finished: Counter,
    panicked: Counter,
}

impl KindCounters {
    fn new(kind: TaskKind) -> Self {
        let label = kind.as_str();
        Self {
            spawned: metrics::counter!("executor.tasks.spawned_total", "kind" => label),
            finished: metrics::counter!("executor.tasks.finished_total", "kind" => label),
            panicked: metrics::counter!("executor.tasks.panicked_total", "kind" => label),
        }
    }
}

/// Spawned, finished and panicked task counters.
#[derive(Clone, Debug)]
pub struct TaskExecutorMetrics {
    critical: KindCounters,
    graceful: KindCounters,
}

impl Default for TaskExecutorMetrics {
    fn default() -> Self {
        Self {
            critical: KindCounters::new(TaskKind::Critical),
            graceful: KindCounters::new(TaskKind::Graceful),
        }
    }
}

impl TaskExecutorMetrics {
    fn counters(&self, kind: TaskKind) -> &KindCounters {
        match kind {
            TaskKind::Critical => &self.critical,
            TaskKind::Graceful => &self.graceful,
        }
    }

    /// Count a spawn. The returned guard counts the task as finished when dropped.
    pub(crate) fn track(&self, kind: TaskKind) -> IncCounterOnDrop {
        let counters = self.counters(kind);
        counters.spawned.increment(1);
        IncCounterOnDrop::new(counters.finished.clone())
    }

    pub(crate) fn inc_panicked(&self, kind: TaskKind) {
        self.counters(kind).panicked.increment(1);
    }
}

/// Increments a counter when dropped, whether the task completed, panicked or was cancelled.
pub struct IncCounterOnDrop(Counter);

impl fmt::Debug for IncCounterOnDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IncCounterOnDrop").finish()
    }
}

impl IncCounterOnDrop {
    pub const fn new(counter: Counter) -> Self {
        Self(counter)
    }
}

impl Drop for IncCounterOnDrop {
    fn drop(&mut self) {
        self.0.increment(1);
    }
}
