//! One shell, many tabs.
//!
//! A [`Session`] owns the PTY process, the scrollback ring and the roster
//! of attached clients. A single roster lock covers the client map, the
//! insertion-order list, the writer seat and the scrollback ring: the
//! output broadcaster appends and fans out under that lock, and a joining
//! client's scrollback snapshot is delivered under the same lock, so a
//! join never misses or duplicates an output byte.
//!
//! Notification hooks are never invoked while the roster lock is held;
//! they are batched in the critical section and dispatched after release.

use super::process::PtyProcess;
use super::types::SessionInfo;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const MIN_COLS: u16 = 40;
pub const MIN_ROWS: u16 = 10;
const PTY_READ_BUFFER_SIZE: usize = 32 * 1024;

pub type ClientId = u64;

/// Whether a tab is visible. A hidden tab reports (0, 0) dimensions,
/// keeps its seat and its output feed, but is excluded from writer
/// election (while visible candidates exist) and from PTY sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Inactive,
}

/// Delivery hooks a connected client plugs into the session.
///
/// Implementations must not block: the output hook runs while the roster
/// lock is held, the rest are dispatched right after it is released.
pub trait ClientHandle: Send + Sync {
    /// Raw terminal output (scrollback snapshot at join, live bytes after).
    fn output(&self, bytes: &[u8]);
    /// This client gained or lost the writer seat.
    fn write_state(&self, writer: bool);
    /// The shared PTY was resized.
    fn size_changed(&self, cols: u16, rows: u16);
    /// The number of active clients changed.
    fn client_count(&self, count: u16);
}

struct ClientSeat {
    handle: Arc<dyn ClientHandle>,
    cols: u16,
    rows: u16,
    activity: Activity,
    joined_at: Instant,
}

enum NoticeKind {
    WriteState(bool),
    Size(u16, u16),
    Count(u16),
}

/// A queued notification, dispatched after the roster lock is released.
pub(crate) struct Notice {
    handle: Arc<dyn ClientHandle>,
    kind: NoticeKind,
}

impl Notice {
    fn write_state(handle: Arc<dyn ClientHandle>, writer: bool) -> Self {
        Self {
            handle,
            kind: NoticeKind::WriteState(writer),
        }
    }

    fn size(handle: Arc<dyn ClientHandle>, cols: u16, rows: u16) -> Self {
        Self {
            handle,
            kind: NoticeKind::Size(cols, rows),
        }
    }

    fn count(handle: Arc<dyn ClientHandle>, count: u16) -> Self {
        Self {
            handle,
            kind: NoticeKind::Count(count),
        }
    }
}

pub(crate) fn dispatch(notices: &[Notice]) {
    for notice in notices {
        match notice.kind {
            NoticeKind::WriteState(writer) => notice.handle.write_state(writer),
            NoticeKind::Size(cols, rows) => notice.handle.size_changed(cols, rows),
            NoticeKind::Count(count) => notice.handle.client_count(count),
        }
    }
}

/// Client table plus scrollback, guarded as one unit by the session's
/// roster lock.
pub(crate) struct Roster {
    clients: HashMap<ClientId, ClientSeat>,
    /// Insertion order, maintained in lockstep with `clients` so election
    /// tie-breaking is deterministic.
    order: Vec<ClientId>,
    writer: Option<ClientId>,
    scrollback: crate::ring::RingBuffer,
    closed: bool,
}

impl Roster {
    pub(crate) fn new(scrollback_capacity: usize) -> Self {
        Self {
            clients: HashMap::new(),
            order: Vec::new(),
            writer: None,
            scrollback: crate::ring::RingBuffer::new(scrollback_capacity),
            closed: false,
        }
    }

    pub(crate) fn writer(&self) -> Option<ClientId> {
        self.writer
    }

    fn active_count(&self) -> u16 {
        self.clients
            .values()
            .filter(|c| c.activity == Activity::Active)
            .count() as u16
    }

    /// Pick the writer. Rules, in order: keep an Active incumbent; else
    /// first Active client in insertion order; else first client in
    /// insertion order; else none. Queues `write_state` notices for the
    /// demoted and promoted clients when the seat moves.
    fn elect(&mut self, notices: &mut Vec<Notice>) -> (Option<ClientId>, Option<ClientId>) {
        let prev = self.writer;
        let incumbent_active = prev.is_some_and(|id| {
            self.clients
                .get(&id)
                .is_some_and(|c| c.activity == Activity::Active)
        });
        let next = if incumbent_active {
            prev
        } else {
            self.order
                .iter()
                .copied()
                .find(|id| {
                    self.clients
                        .get(id)
                        .is_some_and(|c| c.activity == Activity::Active)
                })
                .or_else(|| self.order.first().copied())
        };
        self.writer = next;
        if prev != next {
            if let Some(seat) = prev.and_then(|id| self.clients.get(&id)) {
                notices.push(Notice::write_state(seat.handle.clone(), false));
            }
            if let Some(seat) = next.and_then(|id| self.clients.get(&id)) {
                notices.push(Notice::write_state(seat.handle.clone(), true));
            }
        }
        (prev, next)
    }

    fn queue_counts(&self, notices: &mut Vec<Notice>) {
        let count = self.active_count();
        for seat in self.clients.values() {
            notices.push(Notice::count(seat.handle.clone(), count));
        }
    }

    /// Add a client and deliver the scrollback snapshot to it while the
    /// roster lock is still held by the caller. Callers must not register
    /// with (0, 0) dimensions.
    pub(crate) fn register(
        &mut self,
        id: ClientId,
        cols: u16,
        rows: u16,
        handle: Arc<dyn ClientHandle>,
        notices: &mut Vec<Notice>,
    ) {
        self.clients.insert(
            id,
            ClientSeat {
                handle: handle.clone(),
                cols,
                rows,
                activity: Activity::Active,
                joined_at: Instant::now(),
            },
        );
        self.order.push(id);
        let (prev, next) = self.elect(notices);
        // The joiner learns its seat even when election did not move.
        if !(next == Some(id) && prev != next) {
            notices.push(Notice::write_state(handle.clone(), self.writer == Some(id)));
        }
        self.queue_counts(notices);
        let snapshot = self.scrollback.snapshot();
        if !snapshot.is_empty() {
            handle.output(&snapshot);
        }
    }

    /// Update a client's dimensions and visibility. Returns false for an
    /// unknown client.
    pub(crate) fn set_activity(
        &mut self,
        id: ClientId,
        activity: Activity,
        cols: u16,
        rows: u16,
        notices: &mut Vec<Notice>,
    ) -> bool {
        let prev_active = self.active_count();
        let Some(seat) = self.clients.get_mut(&id) else {
            return false;
        };
        seat.cols = cols;
        seat.rows = rows;
        let changed = seat.activity != activity;
        seat.activity = activity;
        if changed {
            let (prev, next) = self.elect(notices);
            if activity == Activity::Active {
                // A tab coming back may have been demoted while hidden;
                // re-confirm its seat unless election just told it.
                let told = (next == Some(id) && prev != next) || (prev == Some(id) && next != prev);
                if !told {
                    if let Some(seat) = self.clients.get(&id) {
                        notices
                            .push(Notice::write_state(seat.handle.clone(), self.writer == Some(id)));
                    }
                }
            }
        }
        if self.active_count() != prev_active {
            self.queue_counts(notices);
        }
        true
    }

    /// Drop a client. Returns true while clients remain.
    pub(crate) fn remove(&mut self, id: ClientId, notices: &mut Vec<Notice>) -> bool {
        if let Some(seat) = self.clients.remove(&id) {
            debug!("client {} detached after {:?}", id, seat.joined_at.elapsed());
            self.order.retain(|c| *c != id);
            if self.writer == Some(id) {
                self.writer = None;
            }
            self.elect(notices);
            self.queue_counts(notices);
        }
        !self.clients.is_empty()
    }

    /// Minimum dimensions over active clients, clamped to the floor.
    /// None when no client is active (sizing is skipped).
    pub(crate) fn min_active_dims(&self) -> Option<(u16, u16)> {
        let mut dims = self
            .clients
            .values()
            .filter(|c| c.activity == Activity::Active)
            .map(|c| (c.cols, c.rows));
        let first = dims.next()?;
        let (cols, rows) = dims.fold(first, |acc, d| (acc.0.min(d.0), acc.1.min(d.1)));
        Some((cols.max(MIN_COLS), rows.max(MIN_ROWS)))
    }

    /// Append output to scrollback and fan it out to every client, all
    /// under the single roster lock.
    pub(crate) fn broadcast(&mut self, bytes: &[u8]) {
        self.scrollback.write(bytes);
        for seat in self.clients.values() {
            seat.handle.output(bytes);
        }
    }
}

/// One spawned shell with its scrollback and attached clients.
pub struct Session {
    pub id: String,
    pub user_id: String,
    name: RwLock<String>,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: f64,
    last_input: Mutex<Instant>,
    pty: PtyProcess,
    /// Raw PTY output handle, taken by the broadcaster on first use.
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    roster: Mutex<Roster>,
    broadcaster_started: AtomicBool,
    exit_tx: watch::Sender<Option<i32>>,
    closed: AtomicBool,
}

impl Session {
    /// Spawn the shell and its exit watcher.
    pub fn spawn(
        id: String,
        user_id: String,
        name: String,
        scrollback_capacity: usize,
    ) -> Result<Arc<Self>> {
        let (pty, reader) = PtyProcess::spawn(&id)?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let (exit_tx, _) = watch::channel(None);

        let session = Arc::new(Self {
            id,
            user_id,
            name: RwLock::new(name),
            created_at,
            last_input: Mutex::new(Instant::now()),
            pty,
            reader: Mutex::new(Some(reader)),
            roster: Mutex::new(Roster::new(scrollback_capacity)),
            broadcaster_started: AtomicBool::new(false),
            exit_tx,
            closed: AtomicBool::new(false),
        });

        let watcher = Arc::clone(&session);
        tokio::spawn(async move {
            let code = watcher.pty.wait().await;
            let first = watcher.exit_tx.send_if_modified(|v| {
                if v.is_none() {
                    *v = Some(code);
                    true
                } else {
                    false
                }
            });
            if first {
                info!("[session:{}] shell exited with code {}", watcher.id, code);
            }
        });

        Ok(session)
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name(),
            created_at: self.created_at,
            attached: self.has_clients(),
        }
    }

    pub fn has_clients(&self) -> bool {
        !self.roster.lock().clients.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.roster.lock().clients.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Exit code once the shell has terminated (or the session was
    /// closed while the shell still ran, which reads as 0).
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_tx.borrow()
    }

    /// Receiver that resolves to `Some(code)` exactly once.
    pub fn exit_signal(&self) -> watch::Receiver<Option<i32>> {
        self.exit_tx.subscribe()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_input.lock().elapsed()
    }

    /// Shell's current working directory.
    pub fn cwd(&self) -> Option<PathBuf> {
        self.pty.read_cwd()
    }

    /// Attach a client. Delivers the scrollback snapshot to `handle`
    /// atomically with the join: no output byte is missed or repeated
    /// across the boundary. Returns false if the session is closed.
    ///
    /// The first successful registration starts the output broadcaster.
    pub fn register_client(
        self: &Arc<Self>,
        client_id: ClientId,
        cols: u16,
        rows: u16,
        handle: Arc<dyn ClientHandle>,
    ) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut notices = Vec::new();
        {
            let mut roster = self.roster.lock();
            if roster.closed {
                return false;
            }
            roster.register(client_id, cols, rows, handle, &mut notices);
        }
        dispatch(&notices);
        self.start_broadcaster();
        self.resize_to_fit();
        info!("[session:{}] client {} attached", self.id, client_id);
        true
    }

    /// Update a client's visibility and dimensions.
    pub fn set_activity(&self, client_id: ClientId, activity: Activity, cols: u16, rows: u16) {
        let mut notices = Vec::new();
        {
            let mut roster = self.roster.lock();
            if !roster.set_activity(client_id, activity, cols, rows, &mut notices) {
                return;
            }
        }
        dispatch(&notices);
        self.resize_to_fit();
    }

    /// Detach a client.
    pub fn remove_client(&self, client_id: ClientId) {
        let mut notices = Vec::new();
        let remaining = {
            let mut roster = self.roster.lock();
            roster.remove(client_id, &mut notices)
        };
        dispatch(&notices);
        if remaining {
            self.resize_to_fit();
        }
        info!("[session:{}] client {} detached", self.id, client_id);
    }

    /// Forward input to the shell. Input from anyone but the elected
    /// writer is dropped.
    pub fn write_input(&self, client_id: ClientId, data: &[u8]) -> Result<()> {
        {
            let roster = self.roster.lock();
            if roster.writer != Some(client_id) {
                return Ok(());
            }
        }
        *self.last_input.lock() = Instant::now();
        self.pty.write(data)
    }

    /// Resize the PTY to the smallest active viewport (tmux strategy):
    /// a shell rendered for the smallest screen cannot overflow any
    /// other. Skipped while no client is active.
    fn resize_to_fit(&self) {
        let target = self.roster.lock().min_active_dims();
        let Some((cols, rows)) = target else { return };
        if self.pty.size() == (cols, rows) {
            return;
        }
        if let Err(e) = self.pty.resize(cols, rows) {
            warn!("[session:{}] resize failed: {}", self.id, e);
            return;
        }
        debug!("[session:{}] resized to {}x{}", self.id, cols, rows);
        let mut notices = Vec::new();
        {
            let roster = self.roster.lock();
            for seat in roster.clients.values() {
                notices.push(Notice::size(seat.handle.clone(), cols, rows));
            }
        }
        dispatch(&notices);
    }

    /// Read PTY output and fan it out. Idempotent; the first registered
    /// client starts it.
    fn start_broadcaster(self: &Arc<Self>) {
        if self.broadcaster_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = vec![0u8; PTY_READ_BUFFER_SIZE];
            loop {
                let read_result = tokio::task::spawn_blocking(move || {
                    let mut reader = reader;
                    let mut buf = buf;
                    let result = reader.read(&mut buf);
                    (reader, buf, result)
                })
                .await;

                let (returned_reader, returned_buf, result) = match read_result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("[session:{}] broadcaster read panicked: {}", session.id, e);
                        break;
                    }
                };
                reader = returned_reader;
                buf = returned_buf;

                match result {
                    Ok(0) => {
                        debug!("[session:{}] PTY EOF", session.id);
                        break;
                    }
                    Ok(n) => {
                        let mut roster = session.roster.lock();
                        roster.broadcast(&buf[..n]);
                    }
                    Err(e) => {
                        // EIO is the normal end of stream once the shell is gone.
                        debug!("[session:{}] PTY read ended: {}", session.id, e);
                        break;
                    }
                }
            }
            info!("[session:{}] output broadcaster finished", session.id);
        });
    }

    /// Tear the session down: mark it closed, unblock attached clients
    /// through the exit signal and kill the shell. A shell that already
    /// exited keeps its recorded code; otherwise clients observe code 0.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.roster.lock().closed = true;
        self.exit_tx.send_if_modified(|v| {
            if v.is_none() {
                *v = Some(0);
                true
            } else {
                false
            }
        });
        self.pty.close();
        info!("[session:{}] closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Output(Vec<u8>),
        WriteState(bool),
        Size(u16, u16),
        Count(u16),
    }

    #[derive(Default)]
    struct Recorder {
        events: PlMutex<Vec<Event>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }

        fn outputs(&self) -> Vec<u8> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    Event::Output(b) => Some(b.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        fn last_write_state(&self) -> Option<bool> {
            self.events
                .lock()
                .iter()
                .rev()
                .find_map(|e| match e {
                    Event::WriteState(w) => Some(*w),
                    _ => None,
                })
        }
    }

    impl ClientHandle for Recorder {
        fn output(&self, bytes: &[u8]) {
            self.events.lock().push(Event::Output(bytes.to_vec()));
        }
        fn write_state(&self, writer: bool) {
            self.events.lock().push(Event::WriteState(writer));
        }
        fn size_changed(&self, cols: u16, rows: u16) {
            self.events.lock().push(Event::Size(cols, rows));
        }
        fn client_count(&self, count: u16) {
            self.events.lock().push(Event::Count(count));
        }
    }

    fn attach(roster: &mut Roster, id: ClientId, cols: u16, rows: u16) -> Arc<Recorder> {
        let rec = Arc::new(Recorder::default());
        let mut notices = Vec::new();
        roster.register(id, cols, rows, rec.clone(), &mut notices);
        dispatch(&notices);
        rec
    }

    #[test]
    fn first_client_becomes_writer() {
        let mut roster = Roster::new(1024);
        let rec = attach(&mut roster, 1, 80, 24);
        assert_eq!(roster.writer(), Some(1));
        let events = rec.take();
        let promotions: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::WriteState(true)))
            .collect();
        assert_eq!(promotions.len(), 1, "exactly one promotion: {events:?}");
        assert!(events.contains(&Event::Count(1)));
    }

    #[test]
    fn second_client_joins_as_viewer() {
        let mut roster = Roster::new(1024);
        let _a = attach(&mut roster, 1, 80, 24);
        let b = attach(&mut roster, 2, 80, 24);
        assert_eq!(roster.writer(), Some(1));
        assert_eq!(b.last_write_state(), Some(false));
        assert!(b.take().contains(&Event::Count(2)));
    }

    #[test]
    fn hiding_the_writer_hands_off_in_insertion_order() {
        let mut roster = Roster::new(1024);
        let a = attach(&mut roster, 1, 80, 24);
        let b = attach(&mut roster, 2, 80, 24);
        let c = attach(&mut roster, 3, 80, 24);
        a.take();
        b.take();
        c.take();

        let mut notices = Vec::new();
        assert!(roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices));
        dispatch(&notices);

        assert_eq!(roster.writer(), Some(2));
        assert_eq!(a.last_write_state(), Some(false));
        assert_eq!(b.last_write_state(), Some(true));
        assert!(c.take().iter().all(|e| !matches!(e, Event::WriteState(_))));
    }

    #[test]
    fn returning_tab_stays_viewer_and_is_reconfirmed() {
        let mut roster = Roster::new(1024);
        let a = attach(&mut roster, 1, 80, 24);
        let _b = attach(&mut roster, 2, 80, 24);

        let mut notices = Vec::new();
        roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices);
        dispatch(&notices);
        assert_eq!(roster.writer(), Some(2));
        a.take();

        // The incumbent is Active, so the returning tab must not preempt,
        // but it must re-learn that it is a viewer.
        let mut notices = Vec::new();
        roster.set_activity(1, Activity::Active, 100, 30, &mut notices);
        dispatch(&notices);
        assert_eq!(roster.writer(), Some(2));
        assert_eq!(a.take(), vec![Event::WriteState(false), Event::Count(2)]);
    }

    #[test]
    fn removing_the_writer_elects_next_in_insertion_order() {
        let mut roster = Roster::new(1024);
        let _a = attach(&mut roster, 1, 80, 24);
        let b = attach(&mut roster, 2, 80, 24);
        let _c = attach(&mut roster, 3, 80, 24);

        let mut notices = Vec::new();
        assert!(roster.remove(1, &mut notices));
        dispatch(&notices);
        assert_eq!(roster.writer(), Some(2));
        assert_eq!(b.last_write_state(), Some(true));
    }

    #[test]
    fn all_hidden_falls_back_to_first_in_order() {
        let mut roster = Roster::new(1024);
        let a = attach(&mut roster, 1, 80, 24);
        let _b = attach(&mut roster, 2, 80, 24);

        let mut notices = Vec::new();
        roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices);
        roster.set_activity(2, Activity::Inactive, 0, 0, &mut notices);
        dispatch(&notices);

        // No active candidates: the first client keeps the seat anyway.
        assert_eq!(roster.writer(), Some(1));
        assert_eq!(a.last_write_state(), Some(true));
    }

    #[test]
    fn empty_roster_has_no_writer() {
        let mut roster = Roster::new(1024);
        let _a = attach(&mut roster, 1, 80, 24);
        let mut notices = Vec::new();
        assert!(!roster.remove(1, &mut notices));
        assert_eq!(roster.writer(), None);
    }

    #[test]
    fn election_is_deterministic_across_runs() {
        let run = || {
            let mut roster = Roster::new(1024);
            let mut writers = Vec::new();
            let mut notices = Vec::new();
            for id in 1..=4 {
                roster.register(id, 80, 24, Arc::new(Recorder::default()), &mut notices);
                writers.push(roster.writer());
            }
            roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices);
            writers.push(roster.writer());
            roster.remove(2, &mut notices);
            writers.push(roster.writer());
            roster.set_activity(1, Activity::Active, 80, 24, &mut notices);
            writers.push(roster.writer());
            roster.remove(3, &mut notices);
            writers.push(roster.writer());
            writers
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn writer_seat_never_empty_while_clients_exist() {
        let mut roster = Roster::new(1024);
        let mut notices = Vec::new();
        for id in 1..=3 {
            roster.register(id, 80, 24, Arc::new(Recorder::default()), &mut notices);
            assert!(roster.writer().is_some());
        }
        roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices);
        assert!(roster.writer().is_some());
        roster.remove(2, &mut notices);
        assert!(roster.writer().is_some());
        roster.remove(1, &mut notices);
        assert!(roster.writer().is_some());
        roster.remove(3, &mut notices);
        assert_eq!(roster.writer(), None);
    }

    #[test]
    fn join_snapshot_has_no_gap_and_no_overlap() {
        let mut roster = Roster::new(1024);
        roster.broadcast(b"before-join ");
        let rec = attach(&mut roster, 1, 80, 24);
        roster.broadcast(b"after-join");
        assert_eq!(rec.outputs(), b"before-join after-join");

        let snapshots = rec
            .take()
            .into_iter()
            .filter(|e| matches!(e, Event::Output(_)))
            .count();
        assert_eq!(snapshots, 2, "one snapshot chunk plus one live chunk");
    }

    #[test]
    fn empty_scrollback_sends_no_snapshot() {
        let mut roster = Roster::new(1024);
        let rec = attach(&mut roster, 1, 80, 24);
        assert!(rec.outputs().is_empty());
    }

    #[test]
    fn scrollback_is_bounded_for_late_joiners() {
        let mut roster = Roster::new(8);
        roster.broadcast(b"0123456789abcdef");
        let rec = attach(&mut roster, 1, 80, 24);
        assert_eq!(rec.outputs(), b"89abcdef");
    }

    #[test]
    fn sizing_takes_minimum_over_active_clients() {
        let mut roster = Roster::new(1024);
        attach(&mut roster, 1, 120, 40);
        attach(&mut roster, 2, 80, 24);
        attach(&mut roster, 3, 200, 60);
        assert_eq!(roster.min_active_dims(), Some((80, 24)));

        let mut notices = Vec::new();
        roster.remove(3, &mut notices);
        assert_eq!(roster.min_active_dims(), Some((80, 24)));
        roster.remove(2, &mut notices);
        assert_eq!(roster.min_active_dims(), Some((120, 40)));
    }

    #[test]
    fn sizing_clamps_to_floor() {
        let mut roster = Roster::new(1024);
        attach(&mut roster, 1, 30, 5);
        assert_eq!(roster.min_active_dims(), Some((MIN_COLS, MIN_ROWS)));
    }

    #[test]
    fn sizing_skips_hidden_tabs() {
        let mut roster = Roster::new(1024);
        attach(&mut roster, 1, 120, 40);
        attach(&mut roster, 2, 80, 24);
        let mut notices = Vec::new();
        roster.set_activity(2, Activity::Inactive, 0, 0, &mut notices);
        assert_eq!(roster.min_active_dims(), Some((120, 40)));
        roster.set_activity(1, Activity::Inactive, 0, 0, &mut notices);
        assert_eq!(roster.min_active_dims(), None);
    }

    #[test]
    fn count_notifications_track_active_clients() {
        let mut roster = Roster::new(1024);
        let a = attach(&mut roster, 1, 80, 24);
        attach(&mut roster, 2, 80, 24);
        a.take();

        let mut notices = Vec::new();
        roster.set_activity(2, Activity::Inactive, 0, 0, &mut notices);
        dispatch(&notices);
        assert!(a.take().contains(&Event::Count(1)));

        // Dimension-only change, no visibility flip: no count notice.
        let mut notices = Vec::new();
        roster.set_activity(1, Activity::Active, 90, 30, &mut notices);
        dispatch(&notices);
        assert!(a.take().iter().all(|e| !matches!(e, Event::Count(_))));
    }
}
