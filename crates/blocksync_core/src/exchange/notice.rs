//! User-facing notices for exchange failures.

use super::ErrorClass;
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notice {
    pub class: ErrorClass,
    pub message: String,
}

impl Notice {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Sink for notices; the UI layer provides its own.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        warn!(
            "event=exchange_notice module=exchange status=error class={} message={}",
            notice.class.as_str(),
            notice.message
        );
    }
}

/// Lets each distinct notice through `limit` times until [`reset`](Self::reset).
#[derive(Debug)]
pub struct NoticeGate {
    limit: u32,
    seen: HashMap<Notice, u32>,
}

impl NoticeGate {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            seen: HashMap::new(),
        }
    }

    /// Records one occurrence; `true` when it should be shown.
    pub fn admit(&mut self, notice: &Notice) -> bool {
        let count = self.seen.entry(notice.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count <= self.limit
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_suppressed_until_reset() {
        let mut gate = NoticeGate::new(3);
        let notice = Notice::new(ErrorClass::Format, "expected a JSON array");
        let other = Notice::new(ErrorClass::PermanentIo, "denied");

        let shown: Vec<bool> = (0..5).map(|_| gate.admit(&notice)).collect();
        assert_eq!(shown, [true, true, true, false, false]);
        assert!(gate.admit(&other));

        gate.reset();
        assert!(gate.admit(&notice));
    }
}
