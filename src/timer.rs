//! Match countdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::events::EventBus;

const TICK: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// One second elapsed; `remaining` is the new value
    Tick { remaining: u32 },
}

/// Single countdown clock publishing a tick every second.
pub struct TimerService {
    events: EventBus<TimerEvent>,
    remaining: Arc<AtomicU32>,
    main_timer: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            events: EventBus::new(),
            remaining: Arc::new(AtomicU32::new(0)),
            main_timer: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    /// Start counting down from `initial` seconds, replacing any running countdown.
    ///
    /// Reaching zero stops the countdown after publishing the zero tick.
    pub fn start_main_timer(&self, initial: u32) {
        self.stop_main_timer();

        info!("Starting main timer: {}s", initial);
        self.remaining.store(initial, Ordering::SeqCst);

        let events = self.events.clone();
        let remaining = Arc::clone(&self.remaining);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let current = remaining.load(Ordering::SeqCst);
                let next = current.saturating_sub(1);
                remaining.store(next, Ordering::SeqCst);

                events.emit(TimerEvent::Tick { remaining: next });

                if next == 0 {
                    debug!("Main timer reached zero");
                    break;
                }
            }
        });

        if let Ok(mut slot) = self.main_timer.lock() {
            *slot = Some(task);
        }
    }

    pub fn stop_main_timer(&self) {
        if let Ok(mut slot) = self.main_timer.lock() {
            if let Some(task) = slot.take() {
                task.abort();
                debug!("Main timer stopped");
            }
        }
    }

    /// Safe to call with nothing running.
    pub fn stop_all_timers(&self) {
        self.stop_main_timer();
    }

    pub fn is_running(&self) -> bool {
        self.main_timer
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop_all_timers();
    }
}
