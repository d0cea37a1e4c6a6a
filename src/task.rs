//! Task/timer service layered on top of a [`Reactor`].
//!
//! Mirrors the original `pal::net::async::service`: `post`/`post_after`
//! don't take a closure, they take a caller-owned [`Request`] — the same
//! type a socket operation completes through. A "task" is just a request
//! with no `Op` set; the service hands it back via the same completion
//! queue a send or receive would use, so `run_once`/`run_for`/`run`'s
//! callback sees timers, posted tasks, and socket I/O through one uniform
//! `*mut Request` stream.
//!
//! # Safety
//!
//! Every method here carries the same contract as the `Reactor::start_*`
//! family: a posted `Request` must stay alive and must not be touched by
//! the caller while linked into the service's timer set or the reactor's
//! completion queue.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::intrusive::fifo::Fifo;
use crate::reactor::Reactor;
use crate::request::Request;

/// A thin reactor wrapper adding `post`/`post_after` and three ways to
/// drive the loop (`run_once`, `run_for`, `run`).
pub struct Service {
    reactor: Reactor,
    timers: RefCell<Fifo<Request>>,
    next_seq: Cell<u64>,
}

impl Service {
    pub fn new() -> Result<Self> {
        Ok(Service { reactor: Reactor::new()?, timers: RefCell::new(Fifo::new()), next_seq: Cell::new(0) })
    }

    /// The reactor this service drives. Sockets register against this to
    /// have their completions interleaved with posted tasks and timers.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// The service's time source: a monotonic steady clock, matching
    /// `spec.md` §4.5. Deadlines passed to `post_after` are computed from
    /// this, not from a wall clock.
    pub fn now() -> Instant {
        Instant::now()
    }

    /// Enqueue `request` for delivery on the very next drain, with no
    /// timer delay.
    ///
    /// # Safety
    /// `request` must be a currently-idle pointer whose storage outlives
    /// its time in the service.
    pub unsafe fn post(&self, request: *mut Request) {
        (*request).set_deadline(None);
        self.reactor.post_immediate(request);
    }

    /// Insert `request` into the timer set, due `delay` from now. Timers
    /// fire in deadline order; two timers with the same deadline fire in
    /// the order they were posted.
    ///
    /// # Safety
    /// Same as [`Service::post`].
    pub unsafe fn post_after(&self, delay: Duration, request: *mut Request) {
        let deadline = Instant::now() + delay;
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        (*request).set_deadline(Some(deadline));
        (*request).set_seq(seq);
        self.timers.borrow_mut().insert_sorted(request, |a, b| {
            (a.deadline(), a.seq()).cmp(&(b.deadline(), b.seq()))
        });
    }

    /// Move every timer due at or before `now` onto the reactor's
    /// completion queue.
    fn expire_timers(&self, now: Instant) {
        let mut timers = self.timers.borrow_mut();
        loop {
            let head = timers.head();
            if head.is_null() {
                break;
            }
            // SAFETY: `head` is linked into `timers`, which this service
            // exclusively owns; every node in it was posted through
            // `post_after` and so always carries a deadline.
            let due = unsafe { (*head).deadline().expect("timer missing its deadline") <= now };
            if !due {
                break;
            }
            let node = timers.pop();
            unsafe {
                self.reactor.post_immediate(node);
            }
        }
    }

    /// The next timer's deadline, if any are still pending.
    fn next_deadline(&self) -> Option<Instant> {
        let timers = self.timers.borrow();
        let head = timers.head();
        if head.is_null() {
            None
        } else {
            unsafe { (*head).deadline() }
        }
    }

    /// Wait up to `timeout` for the reactor's next wakeup, clamped to the
    /// earliest pending timer deadline so a timer with no I/O to wait on
    /// still fires on time.
    fn poll_clamped(&self, timeout: Option<Duration>, now: Instant) -> Result<()> {
        let timer_wait = self.next_deadline().map(|d| d.saturating_duration_since(now));
        let clamped = match (timeout, timer_wait) {
            (Some(t), Some(w)) => Some(t.min(w)),
            (Some(t), None) => Some(t),
            (None, w) => w,
        };
        self.reactor.poll(clamped)
    }

    /// One reactor poll plus one drain: at most one batch of completions —
    /// whatever was already queued or became ready during this poll — is
    /// delivered to `cb`. A completion `cb` itself starts during this call
    /// is never delivered from within it (spec.md §5, "no recursion in
    /// completion callbacks"): every request is popped off the reactor's
    /// completion queue into a local batch *before* any callback runs, so a
    /// new request that completes inline waits for the next `run_once`.
    pub fn run_once(&self, mut cb: impl FnMut(*mut Request)) -> Result<()> {
        let now = Instant::now();
        self.expire_timers(now);
        self.poll_clamped(None, now)?;
        self.expire_timers(Instant::now());

        let mut batch = Fifo::<Request>::new();
        loop {
            let request = self.reactor.try_completion();
            if request.is_null() {
                break;
            }
            unsafe {
                batch.push(request);
            }
        }
        loop {
            let request = batch.pop();
            if request.is_null() {
                break;
            }
            cb(request);
        }
        Ok(())
    }

    /// Repeated `poll`s until `duration` elapses; timers due within that
    /// window fire. Returns once the wall-clock budget is spent, even if
    /// nothing ever became ready (a bare sleep until the deadline).
    pub fn run_for(&self, duration: Duration, mut cb: impl FnMut(*mut Request)) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.expire_timers(now);
            self.poll_clamped(Some(deadline.saturating_duration_since(now)), now)?;
            self.expire_timers(Instant::now());

            let mut batch = Fifo::<Request>::new();
            loop {
                let request = self.reactor.try_completion();
                if request.is_null() {
                    break;
                }
                unsafe {
                    batch.push(request);
                }
            }
            loop {
                let request = batch.pop();
                if request.is_null() {
                    break;
                }
                cb(request);
            }

            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }

    /// Loop `run_once` until `stop` returns `true`, checked once per
    /// iteration. There is no other built-in termination condition —
    /// matching `spec.md` §4.5's "loop until an external stop condition".
    pub fn run(&self, mut stop: impl FnMut() -> bool, mut cb: impl FnMut(*mut Request)) -> Result<()> {
        while !stop() {
            self.run_once(&mut cb)?;
        }
        Ok(())
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn post_delivers_on_next_run_once() {
        let service = Service::new().unwrap();
        let mut request = Request::new();
        let mut seen = false;
        unsafe {
            service.post(&mut request);
        }
        service
            .run_once(|r| {
                if r == &mut request as *mut Request {
                    seen = true;
                }
            })
            .unwrap();
        assert!(seen);
    }

    #[test]
    fn post_after_respects_deadline_order() {
        let service = Service::new().unwrap();
        let mut r_50 = Request::new();
        let mut r_20 = Request::new();
        let mut r_70 = Request::new();
        unsafe {
            service.post_after(Duration::from_millis(50), &mut r_50);
            service.post_after(Duration::from_millis(20), &mut r_20);
            service.post_after(Duration::from_millis(70), &mut r_70);
        }

        let mut order = Vec::new();
        service
            .run_for(Duration::from_millis(200), |r| {
                if r == &mut r_50 as *mut Request {
                    order.push("50");
                } else if r == &mut r_20 as *mut Request {
                    order.push("20");
                } else if r == &mut r_70 as *mut Request {
                    order.push("70");
                }
            })
            .unwrap();

        assert_eq!(order, vec!["20", "50", "70"]);
    }

    #[test]
    fn ties_fire_in_post_order() {
        let service = Service::new().unwrap();
        let mut first = Request::new();
        let mut second = Request::new();
        unsafe {
            service.post_after(Duration::from_millis(10), &mut first);
            service.post_after(Duration::from_millis(10), &mut second);
        }

        let mut order = Vec::new();
        service
            .run_for(Duration::from_millis(100), |r| {
                if r == &mut first as *mut Request {
                    order.push("first");
                } else if r == &mut second as *mut Request {
                    order.push("second");
                }
            })
            .unwrap();

        assert_eq!(order, vec!["first", "second"]);
    }
}
