//! Deadline bookkeeping for every protocol timer.
//!
//! Each timer kind has at most one armed entry. Arming an already armed kind
//! replaces its deadline and bumps its generation; an expiry is only reported
//! when its generation still matches the armed entry, so a cancelled or
//! re-armed timer never fires.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Instant;

use crate::model::{ConnId, CsKey};

/// Every timer the exporter runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No inbound message within the keepalive interval
    KeepAliveIn(ConnId),
    /// Time to send KEEP_ALIVE
    KeepAliveOut(ConnId),
    /// CONNECT_RESPONSE overdue
    ConnectResponse(ConnId),
    /// FINAL_TEMPLATE_DATA_ACK overdue
    TemplateAck(CsKey),
    /// Unacknowledged records in flight too long
    WindowSize(CsKey),
    /// Candidate collection window of a session (session index)
    BestCollectorWait(usize),
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    generation: u64,
}

/// Ordered set of armed deadlines
#[derive(Debug)]
pub struct TimerService<K = TimerKind> {
    armed: HashMap<K, Armed>,
    schedule: BTreeMap<(Instant, u64), K>,
    next_generation: u64,
}

impl<K: Copy + Eq + Hash> TimerService<K> {
    /// Create an empty timer service
    pub fn new() -> Self {
        Self {
            armed: HashMap::new(),
            schedule: BTreeMap::new(),
            next_generation: 0,
        }
    }

    /// Arm `kind` to fire at `deadline`, replacing any previous deadline
    pub fn arm(&mut self, kind: K, deadline: Instant) -> u64 {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        self.armed.insert(
            kind,
            Armed {
                deadline,
                generation,
            },
        );
        self.schedule.insert((deadline, generation), kind);
        generation
    }

    /// Disarm `kind`; returns whether it was armed
    pub fn cancel(&mut self, kind: K) -> bool {
        match self.armed.remove(&kind) {
            Some(armed) => {
                self.schedule.remove(&(armed.deadline, armed.generation));
                true
            }
            None => false,
        }
    }

    /// Whether `kind` is armed
    pub fn is_armed(&self, kind: K) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Deadline of `kind` if armed
    pub fn deadline(&self, kind: K) -> Option<Instant> {
        self.armed.get(&kind).map(|a| a.deadline)
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.schedule.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        loop {
            let (&(deadline, generation), &kind) = self.schedule.first_key_value()?;
            if deadline > now {
                return None;
            }
            self.schedule.remove(&(deadline, generation));
            let current = self.armed.get(&kind).map(|a| a.generation);
            if current == Some(generation) {
                self.armed.remove(&kind);
                return Some(kind);
            }
        }
    }

    /// Remove and return every timer due at `now`, earliest first
    #[cfg(test)]
    pub fn expired(&mut self, now: Instant) -> Vec<K> {
        std::iter::from_fn(|| self.pop_expired(now)).collect()
    }

    /// Number of armed timers
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no timer is armed
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for TimerService<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let start = Instant::now();
        let mut timers = TimerService::new();
        timers.arm(TimerKind::KeepAliveOut(ConnId(1)), start + Duration::from_secs(3));
        timers.arm(TimerKind::KeepAliveIn(ConnId(1)), start + Duration::from_secs(1));
        timers.arm(TimerKind::BestCollectorWait(0), start + Duration::from_secs(2));

        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(1)));
        assert!(timers.expired(start).is_empty());

        let fired = timers.expired(start + Duration::from_secs(2));
        assert_eq!(
            fired,
            vec![
                TimerKind::KeepAliveIn(ConnId(1)),
                TimerKind::BestCollectorWait(0)
            ]
        );
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let start = Instant::now();
        let mut timers = TimerService::new();
        let kind = TimerKind::ConnectResponse(ConnId(7));
        timers.arm(kind, start + Duration::from_millis(10));
        assert!(timers.cancel(kind));
        assert!(!timers.cancel(kind));

        assert!(timers.expired(start + Duration::from_secs(60)).is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let start = Instant::now();
        let mut timers = TimerService::new();
        let kind = TimerKind::KeepAliveIn(ConnId(2));
        let first = timers.arm(kind, start + Duration::from_secs(1));
        let second = timers.arm(kind, start + Duration::from_secs(5));
        assert!(second > first);

        assert!(timers.expired(start + Duration::from_secs(2)).is_empty());
        assert_eq!(timers.deadline(kind), Some(start + Duration::from_secs(5)));
        assert_eq!(timers.expired(start + Duration::from_secs(5)), vec![kind]);
        assert!(timers.is_empty());
    }
}
