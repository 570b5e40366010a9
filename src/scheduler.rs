// src/scheduler.rs
//! # Domain scheduler
//! Bounded-concurrency dispatch for crawl fetches: a global cap, a
//! per-origin cap, and a minimum delay between dispatches to the same
//! origin. FIFO within an origin; a burst on one origin cannot starve
//! the others.
//!
//! `schedule` parks the caller until a permit is granted, runs the task
//! inline, and releases the slot through a drop guard, so a slot is
//! returned even if the task errors or the caller's future is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::text;

const DRAIN_FLOOR_MS: u64 = 50;
const DRAIN_PAD_MS: u64 = 10;

#[derive(Clone)]
pub struct DomainScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    max_concurrent: usize,
    max_per_origin: usize,
    min_delay: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Pending>,
    running: usize,
    origins: HashMap<String, OriginState>,
    delays: HashMap<String, Duration>,
    timer_armed: bool,
}

struct Pending {
    origin: String,
    permit: oneshot::Sender<()>,
}

#[derive(Default, Clone, Copy)]
struct OriginState {
    active: usize,
    last_start: Option<Instant>,
}

impl DomainScheduler {
    pub fn new(max_concurrent: usize, max_per_origin: usize, min_delay_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                max_per_origin: max_per_origin.max(1),
                min_delay: Duration::from_millis(min_delay_ms),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Override the dispatch delay for one origin (e.g. from a robots
    /// `Crawl-delay`). Callers apply any floor before calling.
    pub fn set_origin_delay(&self, origin: &str, delay_ms: u64) {
        if origin.is_empty() {
            return;
        }
        self.lock()
            .delays
            .insert(origin.to_string(), Duration::from_millis(delay_ms));
    }

    /// Queue `task` for `url`'s origin and run it once dispatch rules
    /// allow. Completion (or drop) frees the slot and re-drains.
    pub async fn schedule<F, T>(&self, url: &str, task: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let origin = text::host_of(url).unwrap_or_default();
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.lock().queue.push_back(Pending {
                origin: origin.clone(),
                permit: tx,
            });
            rx
        };
        self.drain();
        // The sender lives in our own queue and is only dropped by a send,
        // so an Err here is unreachable while `self` is alive.
        let _ = rx.await;
        let _guard = SlotGuard {
            scheduler: self.clone(),
            origin,
        };
        task.await
    }

    /// Number of queued, not-yet-dispatched tasks.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("scheduler state poisoned")
    }

    fn can_run(&self, state: &State, origin: &str, now: Instant) -> bool {
        if state.running >= self.inner.max_concurrent {
            return false;
        }
        let origin_state = state.origins.get(origin).copied().unwrap_or_default();
        if origin_state.active >= self.inner.max_per_origin {
            return false;
        }
        let delay = state
            .delays
            .get(origin)
            .copied()
            .unwrap_or(self.inner.min_delay);
        match origin_state.last_start {
            Some(last) => now.duration_since(last) >= delay,
            None => true,
        }
    }

    /// Dispatch every eligible queued task; if the queue is non-empty and
    /// nothing could start, arm a single timer for the next eligibility.
    fn drain(&self) {
        let mut arm_after: Option<Duration> = None;
        {
            let mut state = self.lock();
            let now = Instant::now();
            let mut dispatched = false;
            let mut i = 0;
            while i < state.queue.len() {
                let origin = state.queue[i].origin.clone();
                if self.can_run(&state, &origin, now) {
                    let pending = state.queue.remove(i).expect("index checked");
                    state.running += 1;
                    let entry = state.origins.entry(origin.clone()).or_default();
                    entry.active += 1;
                    entry.last_start = Some(now);
                    if pending.permit.send(()).is_err() {
                        // Caller dropped while queued; give the slot back.
                        state.running = state.running.saturating_sub(1);
                        if let Some(entry) = state.origins.get_mut(&origin) {
                            entry.active = entry.active.saturating_sub(1);
                        }
                    } else {
                        dispatched = true;
                    }
                } else {
                    i += 1;
                }
            }
            if !dispatched && !state.queue.is_empty() && !state.timer_armed {
                state.timer_armed = true;
                arm_after = Some(self.next_wait(&state, now));
            }
        }
        if let Some(wait) = arm_after {
            let scheduler = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                scheduler.lock().timer_armed = false;
                scheduler.drain();
            });
        }
    }

    /// Minimum wait until some queued origin's delay elapses, floored so
    /// the drain loop never busy-spins.
    fn next_wait(&self, state: &State, now: Instant) -> Duration {
        let mut wait = self.inner.min_delay;
        for pending in &state.queue {
            let delay = state
                .delays
                .get(&pending.origin)
                .copied()
                .unwrap_or(self.inner.min_delay);
            if let Some(last) = state
                .origins
                .get(&pending.origin)
                .and_then(|o| o.last_start)
            {
                let elapsed = now.duration_since(last);
                if elapsed < delay {
                    wait = wait.min(delay - elapsed + Duration::from_millis(DRAIN_PAD_MS));
                }
            }
        }
        wait.max(Duration::from_millis(DRAIN_FLOOR_MS))
    }

    fn release(&self, origin: &str) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            if let Some(entry) = state.origins.get_mut(origin) {
                entry.active = entry.active.saturating_sub(1);
            }
        }
        self.drain();
    }
}

struct SlotGuard {
    scheduler: DomainScheduler,
    origin: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.release(&self.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_origin_cap_is_respected() {
        let scheduler = DomainScheduler::new(8, 2, 1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..12 {
            let s = scheduler.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                s.schedule(&format!("https://one.example/p{i}"), async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn global_cap_is_respected() {
        let scheduler = DomainScheduler::new(3, 2, 1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..10 {
            let s = scheduler.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                s.schedule(&format!("https://origin{i}.example/"), async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slot_released_when_task_errors() {
        let scheduler = DomainScheduler::new(1, 1, 1);
        let r: Result<(), &str> = scheduler
            .schedule("https://a.example/x", async { Err("boom") })
            .await;
        assert!(r.is_err());
        // Slot must be free again: the next task runs to completion.
        let ok = scheduler.schedule("https://a.example/y", async { 42 }).await;
        assert_eq!(ok, 42);
    }
}
