//! Bridge: the process-wide call registry. No shared state between
//! calls beyond this map, keyed by SIP Call-ID.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::CallSession;

#[derive(Clone)]
pub struct Bridge {
    calls: Arc<Mutex<HashMap<String, Arc<CallSession>>>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn insert(&self, session: Arc<CallSession>) {
        self.calls
            .lock()
            .insert(session.call_id().to_string(), session);
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.lock().get(call_id).cloned()
    }

    pub fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.lock().remove(call_id)
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let bridge = Bridge::new();
        assert_eq!(bridge.active_call_count(), 0);
        assert!(bridge.get("missing").is_none());
    }
}
