use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Tracked clients above which `check` sweeps idle entries inline.
const INLINE_SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited { retry_after: Duration },
}

/// Sliding-window request budget per client key.
///
/// Keys whose window has drained are dropped by [`ClientRateLimiter::sweep`],
/// so the map only holds clients seen within the last window.
#[derive(Debug, Clone)]
pub struct ClientRateLimiter {
    clients: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl ClientRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn check(&self, client: &str) -> Admission {
        self.check_at(client, Instant::now())
    }

    /// Drops every client with no request inside the window. Returns how
    /// many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn check_at(&self, client: &str, now: Instant) -> Admission {
        let mut clients = self.clients.lock();
        if clients.len() >= INLINE_SWEEP_THRESHOLD {
            drop_idle(&mut clients, now, self.window);
        }

        let hits = clients.entry(client.to_string()).or_default();
        expire(hits, now, self.window);

        if hits.len() >= self.max_requests {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            if hits.is_empty() {
                clients.remove(client);
            }
            return Admission::Limited { retry_after };
        }

        hits.push_back(now);
        Admission::Allowed
    }

    fn sweep_at(&self, now: Instant) -> usize {
        drop_idle(&mut self.clients.lock(), now, self.window)
    }
}

fn expire(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits
        .front()
        .is_some_and(|oldest| now.duration_since(*oldest) > window)
    {
        hits.pop_front();
    }
}

fn drop_idle(clients: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) -> usize {
    let before = clients.len();
    clients.retain(|_, hits| {
        expire(hits, now, window);
        !hits.is_empty()
    });
    before - clients.len()
}
