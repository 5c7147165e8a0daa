use crate::hw::sh4::SH4EventData;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Timestamp the event was armed at.
    pub start: u64,
    pub deadline: u64,
    pub event_data: SH4EventData,
}

impl ScheduledEvent {
    pub fn data_str(&self) -> String {
        format!("{:?}", self.event_data)
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline) // Reverse order for min-heap behavior
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Virtual-time event queue. Time is counted in CPU clock cycles.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    events: Vec<ScheduledEvent>,
    timestamp: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.timestamp
    }

    pub fn add_cycles(&mut self, cycles: u64) {
        self.timestamp += cycles;
    }

    /// Arms `event_data` to fire `delay` cycles from now.
    pub fn schedule(&mut self, delay: u64, event_data: SH4EventData) {
        self.insert(self.timestamp, delay, event_data);
    }

    fn insert(&mut self, start: u64, delay: u64, event_data: SH4EventData) {
        let new_event = ScheduledEvent {
            start,
            deadline: start.saturating_add(delay),
            event_data,
        };

        // Check for duplicates
        if !self.events.iter().any(|e| e == &new_event) {
            self.events.push(new_event);
            // stable, so equal deadlines keep their arming order
            self.events.sort_by(|a, b| b.cmp(a));
        }
    }

    /// Moves an already armed event, or arms it if it was idle.
    pub fn reschedule(&mut self, delay: u64, event_data: SH4EventData) {
        self.cancel(event_data);
        self.schedule(delay, event_data);
    }

    /// Like `reschedule`, but counts `delay` from `start` instead of now. Periodic
    /// timers re-arm from the deadline that fired so a late pass loses no periods.
    pub fn reschedule_at(&mut self, start: u64, delay: u64, event_data: SH4EventData) {
        self.cancel(event_data);
        self.insert(start, delay, event_data);
    }

    /// Unschedules every pending instance of `event_data`. Returns true if one was pending.
    pub fn cancel(&mut self, event_data: SH4EventData) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.event_data != event_data);
        before != self.events.len()
    }

    pub fn is_scheduled(&self, event_data: SH4EventData) -> bool {
        self.events.iter().any(|e| e.event_data == event_data)
    }

    /// Cycles since `event_data` was armed, or 0 if it is not pending.
    pub fn elapsed(&self, event_data: SH4EventData) -> u64 {
        self.events
            .iter()
            .find(|e| e.event_data == event_data)
            .map_or(0, |e| self.timestamp.saturating_sub(e.start))
    }

    pub fn remaining(&self, event_data: SH4EventData) -> Option<u64> {
        self.events
            .iter()
            .find(|e| e.event_data == event_data)
            .map(|e| e.deadline.saturating_sub(self.timestamp))
    }

    pub fn tick(&mut self) -> Option<ScheduledEvent> {
        if let Some(event) = self.events.first() {
            if event.deadline <= self.timestamp {
                let event = self.events.remove(0);
                return Some(event);
            }
        }

        None
    }
}
