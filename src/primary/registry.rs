use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::error::{Result, SamError};
use crate::session::base::SessionCore;

/// A sub-session as the primary sees it.
pub(crate) trait SubSession: Send + Sync {
    fn core(&self) -> &SessionCore;

    /// Free local resources (sockets, tasks) ahead of a close.
    fn release(&self) {}
}

impl SubSession for SessionCore {
    fn core(&self) -> &SessionCore {
        self
    }
}

/// How the router reaches a sub-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Stream { listen_port: u16 },
    Datagram { port: u16 },
}

struct Entry {
    route: Route,
    handle: Option<Weak<dyn SubSession>>,
}

/// Sub-session routing table of one primary. Locked only while adding or
/// removing entries.
#[derive(Default)]
pub(crate) struct SubSessionRegistry {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl SubSessionRegistry {
    /// Claim `id` and its port before anything is sent to the router.
    pub(crate) fn reserve(&self, id: &str, route: Route) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(id) {
            return Err(SamError::DuplicatedId(id.to_string()));
        }
        if let Some(port) = conflicting_port(&entries, route) {
            return Err(SamError::DuplicatedPort(port));
        }
        entries.insert(id.to_string(), Entry { route, handle: None });
        Ok(())
    }

    pub(crate) fn update_route(&self, id: &str, route: Route) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(id) {
            entry.route = route;
        }
    }

    pub(crate) fn attach(&self, id: &str, handle: Weak<dyn SubSession>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(id) {
            entry.handle = Some(handle);
        }
    }

    pub(crate) fn remove(&self, id: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Empty the table, returning the sub-sessions still alive.
    pub(crate) fn drain(&self) -> Vec<Arc<dyn SubSession>> {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()));
        entries
            .into_values()
            .filter_map(|entry| entry.handle.and_then(|h| h.upgrade()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Port 0 is only a conflict between stream sub-sessions, where it is the
/// default route; a datagram `PORT=0` means "pick one".
fn conflicting_port(entries: &BTreeMap<String, Entry>, route: Route) -> Option<u16> {
    entries.values().find_map(|entry| match (entry.route, route) {
        (Route::Stream { listen_port: a }, Route::Stream { listen_port: b }) if a == b => Some(b),
        (Route::Datagram { port: a }, Route::Datagram { port: b }) if b != 0 && a == b => Some(b),
        _ => None,
    })
}
