//! Sessions: change recorders attached to a connection.
//!
//! A connection owns its sessions in an arena. A [`Session`] handle holds
//! only the arena slot id, a weak reference to the connection, and a
//! shared open flag. Closing the session or its connection clears the
//! flag, after which every operation on the handle fails with
//! [`Error::SessionNotOpen`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tracing::debug;

use rowsync_core::{encode, ChangeLog, ChangeLogEntry, EncodeMode, LogMark};

use crate::config::SessionOptions;
use crate::connection::ConnectionInner;
use crate::error::{Error, Result};

/// Arena slot of a session. Stale ids never match a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A live session as the connection stores it.
pub(crate) struct SessionState {
    pub(crate) options: SessionOptions,
    pub(crate) log: ChangeLog,
    open: Rc<Cell<bool>>,
}

impl SessionState {
    pub(crate) fn is_open(&self) -> bool {
        self.open.get()
    }
}

struct Slot {
    generation: u32,
    state: Option<SessionState>,
}

/// Sessions owned by one connection.
#[derive(Default)]
pub(crate) struct SessionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SessionArena {
    /// Add a session and return its id and open flag.
    pub(crate) fn insert(&mut self, options: SessionOptions) -> (SessionId, Rc<Cell<bool>>) {
        self.sweep();
        let open = Rc::new(Cell::new(true));
        let state = SessionState {
            options,
            log: ChangeLog::new(),
            open: open.clone(),
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].state = Some(state);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: Some(state),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let generation = self.slots[index as usize].generation;
        (SessionId { index, generation }, open)
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<&SessionState> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.state.as_ref())
            .filter(|state| state.is_open())
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut SessionState> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.state.as_mut())
            .filter(|state| state.is_open())
    }

    /// Close a session and free its slot.
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<SessionState> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let state = slot.state.take()?;
        state.open.set(false);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(state)
    }

    /// Close every session. Returns how many were open.
    pub(crate) fn close_all(&mut self) -> usize {
        let ids = self.ids();
        for &id in &ids {
            self.remove(id);
        }
        self.sweep();
        ids.len()
    }

    /// Ids of every open session, in creation slot order.
    pub(crate) fn ids(&self) -> Vec<SessionId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.as_ref().is_some_and(SessionState::is_open))
            .map(|(index, slot)| SessionId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// Ids of open sessions that record writes to `schema.table`.
    pub(crate) fn observers(&self, schema: &str, table: &str) -> Vec<SessionId> {
        self.ids()
            .into_iter()
            .filter(|&id| {
                self.get(id)
                    .is_some_and(|state| state.options.observes(schema, table))
            })
            .collect()
    }

    /// Current log position of every open session.
    pub(crate) fn marks(&self) -> Vec<(SessionId, LogMark)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id).map(|state| (id, state.log.mark())))
            .collect()
    }

    /// Drop entries recorded since `marks` was taken.
    ///
    /// Sessions created after the marks lose everything they recorded.
    pub(crate) fn discard_since(&mut self, marks: &[(SessionId, LogMark)]) {
        for id in self.ids() {
            let mark = marks
                .iter()
                .find(|(m, _)| *m == id)
                .map(|(_, mark)| *mark)
                .unwrap_or_default();
            if let Some(state) = self.get_mut(id) {
                state.log.discard_since(mark);
            }
        }
    }

    /// Free slots whose handle was dropped while the connection was busy.
    fn sweep(&mut self) {
        let stale: Vec<SessionId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.as_ref().is_some_and(|s| !s.is_open()))
            .map(|(index, slot)| SessionId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        for id in stale {
            self.remove(id);
        }
    }
}

/// A change recorder on a connection.
///
/// Records every row write the connection performs inside its scope,
/// including writes made by replaying a changeset. Dropping the handle
/// closes the session.
pub struct Session {
    id: SessionId,
    options: SessionOptions,
    open: Rc<Cell<bool>>,
    owner: Weak<RefCell<ConnectionInner>>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        options: SessionOptions,
        open: Rc<Cell<bool>>,
        owner: Weak<RefCell<ConnectionInner>>,
    ) -> Self {
        Self {
            id,
            options,
            open,
            owner,
        }
    }

    /// Arena id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session can still be used.
    pub fn is_open(&self) -> bool {
        self.open.get() && self.owner.strong_count() > 0
    }

    /// The table this session is restricted to, if any.
    pub fn table(&self) -> Result<Option<&str>> {
        self.check_open()?;
        Ok(self.options.table.as_deref())
    }

    /// The schema this session records.
    pub fn db(&self) -> Result<&str> {
        self.check_open()?;
        Ok(&self.options.db)
    }

    /// Encode everything recorded so far as a changeset.
    ///
    /// Empty when nothing was recorded. The log is left as is.
    pub fn changeset(&self) -> Result<Bytes> {
        self.with_log(|log| encode(log.entries(), EncodeMode::Full))
    }

    /// Encode everything recorded so far as a patchset.
    pub fn patchset(&self) -> Result<Bytes> {
        self.with_log(|log| encode(log.entries(), EncodeMode::Condensed))
    }

    /// A copy of the recorded entries, in capture order.
    pub fn entries(&self) -> Result<Vec<ChangeLogEntry>> {
        self.with_log(|log| log.entries().to_vec())
    }

    /// Number of recorded entries.
    pub fn len(&self) -> Result<usize> {
        self.with_log(ChangeLog::len)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> Result<bool> {
        self.with_log(ChangeLog::is_empty)
    }

    /// Close the session and release its log.
    ///
    /// Closing twice fails with [`Error::SessionNotOpen`].
    pub fn close(&self) -> Result<()> {
        self.check_open()?;
        let owner = self.owner.upgrade().ok_or(Error::SessionNotOpen)?;
        let mut inner = owner.try_borrow_mut().map_err(|_| Error::ConnectionBusy)?;
        inner.sessions.remove(self.id).ok_or(Error::SessionNotOpen)?;
        debug!(session = %self.id, "session closed");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::SessionNotOpen)
        }
    }

    fn with_log<T>(&self, f: impl FnOnce(&ChangeLog) -> T) -> Result<T> {
        self.check_open()?;
        let owner = self.owner.upgrade().ok_or(Error::SessionNotOpen)?;
        let inner = owner.try_borrow().map_err(|_| Error::ConnectionBusy)?;
        let state = inner.sessions.get(self.id).ok_or(Error::SessionNotOpen)?;
        Ok(f(&state.log))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.open.replace(false) {
            return;
        }
        // A busy connection frees the slot on its next sweep.
        if let Some(owner) = self.owner.upgrade() {
            if let Ok(mut inner) = owner.try_borrow_mut() {
                inner.sessions.remove(self.id);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("table", &self.options.table)
            .field("db", &self.options.db)
            .field("open", &self.is_open())
            .finish()
    }
}
