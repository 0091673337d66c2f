//! Ordered, durably committed resource eventlog.
//!
//! `Reslog` is a pure state machine; its owner performs the storage writes.
//! Posted entries queue up in order. Live-only entries complete as soon as
//! they reach the head of the queue, the rest start a storage commit and
//! complete when the owner reports the commit result. Only one commit is in
//! flight at a time, so entries complete in the order they were posted.
//!
//! The journal serves subscribers the in-memory backlog one entry per step,
//! then an empty delimiter, then every newly completed entry.

use serde_json::json;
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;

use crate::domain::resource::eventlog::EventlogEntry;
use crate::domain::resource::request::RequestHandle;
use crate::domain::utils::id::ClientId;
use crate::error::{Error, Result};

new_key_type! {
    pub struct JournalKey;
}

/// An entry that left the queue. `token` is whatever the poster attached.
#[derive(Debug)]
pub struct Completed<T> {
    pub entry: EventlogEntry,
    pub result: Result<()>,
    pub token: Option<T>,
}

/// What the owner must act on after feeding the state machine.
#[derive(Debug)]
pub struct Progress<T> {
    pub completed: Vec<Completed<T>>,
    /// Entry whose storage commit must start now.
    pub commit: Option<EventlogEntry>,
}

impl<T> Default for Progress<T> {
    fn default() -> Self {
        Self { completed: Vec::new(), commit: None }
    }
}

#[derive(Debug)]
struct Pending<T> {
    entry: EventlogEntry,
    no_commit: bool,
    token: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalState {
    /// Absolute index of the next backlog entry to send.
    Backlog(usize),
    Live,
}

#[derive(Debug)]
struct Journal {
    handle: RequestHandle,
    state: JournalState,
}

/// Result of one backlog step for a journal subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalStep {
    /// An entry was sent, call again.
    More,
    /// The delimiter was sent, the subscriber is live.
    Live,
    /// The subscriber is gone.
    Gone,
}

#[derive(Debug)]
pub struct Reslog<T, W> {
    entries: VecDeque<EventlogEntry>,
    /// Absolute index of `entries[0]`; grows as old entries are trimmed.
    base: usize,
    journal_max: Option<usize>,
    pending: VecDeque<Pending<T>>,
    in_flight: bool,
    watchers: Vec<(Option<String>, W)>,
    journals: SlotMap<JournalKey, Journal>,
    sync_waiters: Vec<RequestHandle>,
}

impl<T, W: Copy> Reslog<T, W> {
    /// Starts from the already persisted `backlog`.
    pub fn new(backlog: Vec<EventlogEntry>, journal_max: Option<usize>) -> Self {
        let mut reslog = Reslog {
            entries: backlog.into(),
            base: 0,
            journal_max,
            pending: VecDeque::new(),
            in_flight: false,
            watchers: Vec::new(),
            journals: SlotMap::with_key(),
            sync_waiters: Vec::new(),
        };
        reslog.trim();
        reslog
    }

    /// Entries currently held in memory, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &EventlogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// No queued entries and no commit in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }

    /// Registers a watcher for entries named `name` (all entries if `None`).
    pub fn add_watcher(&mut self, name: Option<&str>, watcher: W) {
        self.watchers.push((name.map(str::to_string), watcher));
    }

    /// Watchers interested in `name`, in registration order.
    pub fn watchers_for(&self, name: &str) -> Vec<W> {
        self.watchers.iter().filter(|(filter, _)| filter.as_deref().is_none_or(|f| f == name)).map(|(_, watcher)| *watcher).collect()
    }

    /// Queues `entry`. `no_commit` entries are recorded in memory and fanned
    /// out but never written to storage.
    pub fn post(&mut self, entry: EventlogEntry, no_commit: bool, token: Option<T>) -> Progress<T> {
        log::debug!("reslog: queue {} (no_commit={})", entry.name, no_commit);
        self.pending.push_back(Pending { entry, no_commit, token });
        self.pump()
    }

    /// Reports the outcome of the commit started by the last `Progress`.
    pub fn commit_finished(&mut self, result: Result<()>) -> Progress<T> {
        if !self.in_flight {
            log::error!("reslog: commit completion without a commit in flight");
            return Progress::default();
        }
        self.in_flight = false;

        let Some(head) = self.pending.pop_front() else {
            log::error!("reslog: commit completion with an empty queue");
            return Progress::default();
        };

        match &result {
            Ok(()) => self.record(head.entry.clone()),
            Err(e) => log::error!("reslog: commit of {} event failed: {}", head.entry.name, e),
        }

        let mut progress = self.pump();
        progress.completed.insert(0, Completed { entry: head.entry, result, token: head.token });
        progress
    }

    fn pump(&mut self) -> Progress<T> {
        let mut progress = Progress::default();
        while !self.in_flight {
            match self.pending.front() {
                None => break,
                Some(head) if head.no_commit => {
                    if let Some(head) = self.pending.pop_front() {
                        self.record(head.entry.clone());
                        progress.completed.push(Completed { entry: head.entry, result: Ok(()), token: head.token });
                    }
                }
                Some(head) => {
                    self.in_flight = true;
                    progress.commit = Some(head.entry.clone());
                }
            }
        }
        progress
    }

    fn record(&mut self, entry: EventlogEntry) {
        self.entries.push_back(entry);
        self.trim();
    }

    fn trim(&mut self) {
        if let Some(max) = self.journal_max {
            while self.entries.len() > max {
                self.entries.pop_front();
                self.base += 1;
            }
        }
    }

    fn end(&self) -> usize {
        self.base + self.entries.len()
    }

    //------------------------
    // --- Durability barrier
    //------------------------

    /// Answers `handle` once every queued entry has completed.
    pub fn add_sync_waiter(&mut self, handle: RequestHandle) {
        if self.is_idle() {
            handle.respond(json!({}));
        } else {
            self.sync_waiters.push(handle);
        }
    }

    /// Answers the waiters if the queue has drained.
    pub fn release_sync_waiters(&mut self) {
        if self.is_idle() {
            for handle in self.sync_waiters.drain(..) {
                handle.respond(json!({}));
            }
        }
    }

    //-------------------
    // --- Journal
    //-------------------

    pub fn journal_add(&mut self, handle: RequestHandle) -> JournalKey {
        let state = JournalState::Backlog(self.base);
        self.journals.insert(Journal { handle, state })
    }

    /// Sends the next backlog entry (or the delimiter) to `key`.
    pub fn journal_step(&mut self, key: JournalKey) -> JournalStep {
        let base = self.base;
        let end = self.end();
        let Some(journal) = self.journals.get_mut(key) else {
            return JournalStep::Gone;
        };
        let JournalState::Backlog(cursor) = journal.state else {
            return JournalStep::Live;
        };

        let cursor = cursor.max(base);
        let (sent, live) = if cursor < end {
            journal.state = JournalState::Backlog(cursor + 1);
            let entry = &self.entries[cursor - base];
            (journal.handle.respond(json!({"events": [entry.to_value()]})), false)
        } else {
            journal.state = JournalState::Live;
            (journal.handle.respond(json!({"events": []})), true)
        };

        if !sent {
            self.journals.remove(key);
            return JournalStep::Gone;
        }
        if live { JournalStep::Live } else { JournalStep::More }
    }

    /// Sends `entry` to every live subscriber, dropping those that are gone.
    pub fn journal_fan_out(&mut self, entry: &EventlogEntry) {
        let value = json!({"events": [entry.to_value()]});
        self.journals.retain(|_, journal| journal.state != JournalState::Live || journal.handle.respond(value.clone()));
    }

    /// Ends the matching subscriptions with `NoData`. Returns how many.
    pub fn journal_cancel(&mut self, client: &ClientId, matchtag: Option<u32>) -> usize {
        let mut canceled = 0;
        self.journals.retain(|_, journal| {
            if journal.handle.is_from(client, matchtag) {
                journal.handle.respond_error(Error::NoData("journal canceled".to_string()));
                canceled += 1;
                false
            } else {
                true
            }
        });
        canceled
    }

    /// Drops everything owned by `client` without responding.
    pub fn disconnect(&mut self, client: &ClientId) {
        self.journals.retain(|_, journal| !journal.handle.is_from(client, None));
        self.sync_waiters.retain(|handle| !handle.is_from(client, None));
    }

    pub fn journal_count(&self) -> usize {
        self.journals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::eventlog::ResourceEvent;
    use crate::domain::resource::request::Response;
    use crate::domain::utils::idset::Idset;
    use std::str::FromStr;
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestReslog = Reslog<u32, char>;

    fn event(name: &str, ts: f64) -> EventlogEntry {
        let idset = Idset::from_str("0").unwrap();
        let event = match name {
            "online" => ResourceEvent::Online { idset },
            "exclude" => ResourceEvent::Exclude { idset },
            _ => ResourceEvent::Drain { idset, nodelist: None, reason: None, overwrite: 0 },
        };
        event.to_entry(ts)
    }

    fn drain_events(rx: &mut UnboundedReceiver<Response>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(response) = rx.try_recv() {
            out.push(response.unwrap());
        }
        out
    }

    #[test]
    fn test_one_commit_in_flight_preserves_order() {
        let mut reslog = TestReslog::new(Vec::new(), None);

        let first = reslog.post(event("drain", 1.0), false, Some(1));
        assert_eq!(first.commit.as_ref().map(|e| e.timestamp), Some(1.0));
        assert!(first.completed.is_empty());

        // Queued behind the in-flight commit, even though it is live-only.
        let second = reslog.post(event("online", 2.0), true, Some(2));
        assert!(second.commit.is_none());
        assert!(second.completed.is_empty());
        let third = reslog.post(event("exclude", 3.0), false, Some(3));
        assert!(third.commit.is_none());

        let progress = reslog.commit_finished(Ok(()));
        let tokens: Vec<u32> = progress.completed.iter().filter_map(|c| c.token).collect();
        assert_eq!(tokens, vec![1, 2]);
        assert_eq!(progress.commit.as_ref().map(|e| e.timestamp), Some(3.0));
        assert!(!reslog.is_idle());

        let progress = reslog.commit_finished(Ok(()));
        assert_eq!(progress.completed.len(), 1);
        assert!(progress.commit.is_none());
        assert!(reslog.is_idle());

        let order: Vec<f64> = reslog.entries().map(|e| e.timestamp).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_failed_commit_is_not_recorded() {
        let mut reslog = TestReslog::new(Vec::new(), None);
        reslog.post(event("drain", 1.0), false, Some(7));
        let progress = reslog.commit_finished(Err(Error::RemoteIo("kvs down".into())));
        assert_eq!(progress.completed.len(), 1);
        assert!(progress.completed[0].result.is_err());
        assert!(reslog.is_empty());
        assert!(reslog.is_idle());
    }

    #[test]
    fn test_spurious_completion_is_ignored() {
        let mut reslog = TestReslog::new(Vec::new(), None);
        let progress = reslog.commit_finished(Ok(()));
        assert!(progress.completed.is_empty());
    }

    #[test]
    fn test_watchers_in_registration_order() {
        let mut reslog = TestReslog::new(Vec::new(), None);
        reslog.add_watcher(Some("drain"), 'd');
        reslog.add_watcher(None, 'a');
        reslog.add_watcher(Some("online"), 'o');
        assert_eq!(reslog.watchers_for("drain"), vec!['d', 'a']);
        assert_eq!(reslog.watchers_for("online"), vec!['a', 'o']);
        assert_eq!(reslog.watchers_for("exclude"), vec!['a']);
    }

    #[test]
    fn test_journal_backlog_then_live() {
        let backlog = vec![event("drain", 1.0), event("exclude", 2.0)];
        let mut reslog = TestReslog::new(backlog, None);
        let (handle, mut rx) = RequestHandle::channel(ClientId::new("c"), 1);
        let key = reslog.journal_add(handle);

        // Live entries are not sent before the backlog is done.
        reslog.post(event("online", 3.0), true, None);
        reslog.journal_fan_out(&event("online", 3.0));
        assert!(drain_events(&mut rx).is_empty());

        assert_eq!(reslog.journal_step(key), JournalStep::More);
        assert_eq!(reslog.journal_step(key), JournalStep::More);
        assert_eq!(reslog.journal_step(key), JournalStep::More);
        assert_eq!(reslog.journal_step(key), JournalStep::Live);

        let sent = drain_events(&mut rx);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2]["events"][0]["name"], "online");
        assert_eq!(sent[3], json!({"events": []}));

        reslog.journal_fan_out(&event("exclude", 4.0));
        let sent = drain_events(&mut rx);
        assert_eq!(sent[0]["events"][0]["timestamp"], 4.0);
    }

    #[test]
    fn test_journal_cancel_and_disconnect() {
        let mut reslog = TestReslog::new(Vec::new(), None);
        let (a, mut rx_a) = RequestHandle::channel(ClientId::new("a"), 1);
        let (b, rx_b) = RequestHandle::channel(ClientId::new("b"), 1);
        reslog.journal_add(a);
        let key_b = reslog.journal_add(b);

        assert_eq!(reslog.journal_cancel(&ClientId::new("a"), None), 1);
        assert!(matches!(rx_a.try_recv(), Ok(Err(Error::NoData(_)))));

        drop(rx_b);
        assert_eq!(reslog.journal_step(key_b), JournalStep::Gone);
        assert_eq!(reslog.journal_count(), 0);
    }

    #[test]
    fn test_journal_max_trims_backlog() {
        let backlog = vec![event("drain", 1.0), event("drain", 2.0), event("drain", 3.0)];
        let mut reslog = TestReslog::new(backlog, Some(2));
        assert_eq!(reslog.len(), 2);

        let (handle, mut rx) = RequestHandle::channel(ClientId::new("c"), 1);
        let key = reslog.journal_add(handle);
        while reslog.journal_step(key) == JournalStep::More {}
        let sent = drain_events(&mut rx);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["events"][0]["timestamp"], 2.0);
    }

    #[test]
    fn test_sync_waiters_released_when_idle() {
        let mut reslog = TestReslog::new(Vec::new(), None);
        let (early, mut rx_early) = RequestHandle::channel(ClientId::new("c"), 1);
        reslog.add_sync_waiter(early);
        assert!(rx_early.try_recv().is_ok());

        reslog.post(event("drain", 1.0), false, None);
        let (late, mut rx_late) = RequestHandle::channel(ClientId::new("c"), 2);
        reslog.add_sync_waiter(late);
        reslog.release_sync_waiters();
        assert!(rx_late.try_recv().is_err());

        reslog.commit_finished(Ok(()));
        reslog.release_sync_waiters();
        assert!(rx_late.try_recv().is_ok());
    }
}
