/*
 *  Copyright 2025 Herald Developers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Bounded handoff queue between the feeder and an app's delivery workers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::models::Notification;

struct State {
    items: VecDeque<Notification>,
    busy: usize,
    stopped: bool,
}

impl State {
    fn is_idle(&self) -> bool {
        self.busy == 0 && self.items.is_empty()
    }
}

/// FIFO queue with busy-worker accounting.
///
/// A worker that pops an item counts as busy until it calls
/// [`DeliveryQueue::mark_idle`]. The queue is idle when nothing is buffered and
/// no worker is busy. All transitions happen under one lock; waiters register
/// with their [`Notify`] before inspecting the state, so no wakeup is lost.
pub struct DeliveryQueue {
    state: Mutex<State>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    idle: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                busy: 0,
                stopped: false,
            }),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Appends to the tail, waiting while the queue is at capacity.
    pub async fn push(&self, notification: Notification) -> Result<(), QueueError> {
        let mut notification = Some(notification);
        loop {
            let not_full = self.not_full.notified();
            tokio::pin!(not_full);
            not_full.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.stopped {
                    return Err(QueueError::Stopped);
                }
                if state.items.len() < self.capacity {
                    if let Some(notification) = notification.take() {
                        state.items.push_back(notification);
                    }
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }

            not_full.await;
        }
    }

    /// Appends to the tail unless the queue is at capacity. Never waits.
    pub fn try_push(&self, notification: Notification) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(QueueError::Stopped);
        }
        if state.items.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        state.items.push_back(notification);
        drop(state);
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Puts an item back at the head, ignoring capacity.
    pub fn requeue(&self, notification: Notification) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(QueueError::Stopped);
        }
        state.items.push_front(notification);
        drop(state);
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Waits for the head item and marks the caller busy.
    ///
    /// Returns `None` once the queue is stopped.
    pub async fn pop(&self) -> Option<Notification> {
        loop {
            let not_empty = self.not_empty.notified();
            tokio::pin!(not_empty);
            not_empty.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.stopped {
                    return None;
                }
                if let Some(notification) = state.items.pop_front() {
                    state.busy += 1;
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(notification);
                }
            }

            not_empty.await;
        }
    }

    /// Returns the calling worker to idle after it finished its item.
    pub fn mark_idle(&self) {
        let mut state = self.state.lock();
        state.busy = state.busy.saturating_sub(1);
        let idle = state.is_idle();
        drop(state);
        if idle {
            self.idle.notify_waiters();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn busy(&self) -> usize {
        self.state.lock().busy
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Resolves once the queue is idle.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.is_idle() {
                return;
            }

            idle.await;
        }
    }

    /// Drops every buffered item without stopping the queue.
    ///
    /// Returns how many were dropped. They remain pending in the store.
    pub fn discard(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.items.len();
        state.items.clear();
        let idle = state.is_idle();
        drop(state);

        self.not_full.notify_waiters();
        if idle {
            self.idle.notify_waiters();
        }
        discarded
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops the queue and wakes every waiter.
    ///
    /// Buffered items are discarded; they remain pending in the store. Items
    /// already popped are unaffected.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.items.clear();
        let idle = state.is_idle();
        drop(state);

        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        if idle {
            self.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeliveryQueue")
            .field("len", &state.items.len())
            .field("busy", &state.busy)
            .field("stopped", &state.stopped)
            .field("capacity", &self.capacity)
            .finish()
    }
}
