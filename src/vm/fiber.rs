// Cooperative fibers: snapshots, run queue and timed sleep

use super::value::Value;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::mem;
use std::time::Instant;
use tracing::debug;

/// Execution state of one fiber. The running fiber's state lives in the VM;
/// every other fiber is parked here as a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Fiber {
    pub ip: usize,
    /// Operand stack, also holding the active frame's parameters and locals
    pub stack: Vec<Value>,
    /// Return addresses of active user calls
    pub call_stack: Vec<usize>,
    /// Parallel to `call_stack`: whether that frame is the `draw` routine
    pub draw_frames: Vec<bool>,
    /// Array shapes of the active frame, by slot
    pub array_dims: FxHashMap<usize, Vec<usize>>,
    /// Parallel to `call_stack`: the callers' array shapes
    pub saved_dims: Vec<FxHashMap<usize, Vec<usize>>>,
}

impl Fiber {
    pub fn at(ip: usize) -> Self {
        Fiber {
            ip,
            ..Fiber::default()
        }
    }

    /// Enter a call frame returning to `ret`. The callee starts with no
    /// array shapes of its own.
    pub fn push_frame(&mut self, ret: usize, is_draw: bool) {
        self.call_stack.push(ret);
        self.draw_frames.push(is_draw);
        self.saved_dims.push(mem::take(&mut self.array_dims));
    }

    /// Leave the innermost frame, restoring the caller's array shapes
    pub fn pop_frame(&mut self) -> Option<usize> {
        let ret = self.call_stack.pop()?;
        self.draw_frames.pop();
        self.array_dims = self.saved_dims.pop().unwrap_or_default();
        Some(ret)
    }

    /// True while any active frame belongs to `draw`
    pub fn inside_draw(&self) -> bool {
        self.draw_frames.iter().any(|d| *d)
    }
}

#[derive(Debug, Clone, Copy)]
struct SleepEntry {
    fiber: usize,
    wake_at: Instant,
    seq: u64,
}

/// What happened after the running fiber finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberExit {
    /// Another runnable fiber is now live
    Resumed(usize),
    /// Nothing is runnable but some fiber is asleep
    Idle,
    /// No fibers remain
    Done,
}

/// Round-robin scheduler. Invariant: `current` is the head of `run_queue`
/// whenever it is `Some`.
#[derive(Debug)]
pub struct Scheduler {
    fibers: Vec<Fiber>,
    free: Vec<usize>,
    run_queue: VecDeque<usize>,
    sleeping: Vec<SleepEntry>,
    current: Option<usize>,
    next_seq: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler with only the main fiber (index 0) running
    pub fn new() -> Self {
        Scheduler {
            fibers: vec![Fiber::default()],
            free: Vec::new(),
            run_queue: VecDeque::from([0]),
            sleeping: Vec::new(),
            current: Some(0),
            next_seq: 0,
        }
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn runnable(&self) -> usize {
        self.run_queue.len()
    }

    pub fn sleeping(&self) -> usize {
        self.sleeping.len()
    }

    /// Number of live fibers, running or parked
    pub fn live_fibers(&self) -> usize {
        self.run_queue.len() + self.sleeping.len()
    }

    /// Queue a new fiber at `ip`. The running fiber keeps running.
    pub fn spawn(&mut self, ip: usize) -> usize {
        let index = match self.free.pop() {
            Some(slot) => {
                self.fibers[slot] = Fiber::at(ip);
                slot
            }
            None => {
                self.fibers.push(Fiber::at(ip));
                self.fibers.len() - 1
            }
        };
        self.run_queue.push_back(index);
        debug!(fiber = index, ip, "fiber spawned");
        index
    }

    fn activate_head(&mut self, live: &mut Fiber) -> Option<usize> {
        let next = *self.run_queue.front()?;
        *live = mem::take(&mut self.fibers[next]);
        self.current = Some(next);
        Some(next)
    }

    /// Park the running fiber at the tail and make the next one live.
    /// Returns false (and changes nothing) when no other fiber is runnable.
    pub fn yield_now(&mut self, live: &mut Fiber) -> bool {
        let Some(cur) = self.current else {
            return false;
        };
        if self.run_queue.len() <= 1 {
            return false;
        }
        self.fibers[cur] = mem::take(live);
        self.run_queue.rotate_left(1);
        let next = self.activate_head(live);
        debug!(from = cur, to = ?next, "fiber yield");
        true
    }

    /// Put the running fiber to sleep until `wake_at` and make the next
    /// runnable fiber live, if any.
    pub fn sleep(&mut self, live: &mut Fiber, wake_at: Instant) {
        let Some(cur) = self.current else {
            return;
        };
        self.fibers[cur] = mem::take(live);
        self.run_queue.pop_front();
        self.sleeping.push(SleepEntry {
            fiber: cur,
            wake_at,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.current = None;
        let next = self.activate_head(live);
        debug!(fiber = cur, next = ?next, "fiber sleeping");
    }

    /// Retire the running fiber and pick what runs next
    pub fn finish(&mut self, live: &mut Fiber) -> FiberExit {
        let Some(cur) = self.current.take() else {
            return if self.sleeping.is_empty() {
                FiberExit::Done
            } else {
                FiberExit::Idle
            };
        };
        self.run_queue.pop_front();
        self.fibers[cur] = Fiber::default();
        self.free.push(cur);
        *live = Fiber::default();
        debug!(fiber = cur, "fiber finished");

        match self.activate_head(live) {
            Some(next) => FiberExit::Resumed(next),
            None if self.sleeping.is_empty() => FiberExit::Done,
            None => FiberExit::Idle,
        }
    }

    /// Earliest pending wake-up
    pub fn next_wake(&self) -> Option<Instant> {
        self.sleeping.iter().map(|e| e.wake_at).min()
    }

    /// Re-admit every sleeper whose wake time has passed, earliest first.
    /// If nothing was running, the first runnable fiber becomes live.
    pub fn wake_expired(&mut self, now: Instant, live: &mut Fiber) -> usize {
        if self.sleeping.is_empty() {
            return 0;
        }
        let mut woken: Vec<SleepEntry> = Vec::new();
        self.sleeping.retain(|e| {
            if e.wake_at <= now {
                woken.push(*e);
                false
            } else {
                true
            }
        });
        woken.sort_by_key(|e| (e.wake_at, e.seq));
        for entry in &woken {
            self.run_queue.push_back(entry.fiber);
            debug!(fiber = entry.fiber, "fiber woke");
        }
        self.resume_idle(live);
        woken.len()
    }

    /// Make the queue head live when no fiber currently is
    pub fn resume_idle(&mut self, live: &mut Fiber) -> bool {
        if self.current.is_some() {
            return false;
        }
        self.activate_head(live).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_yield_rotates_snapshots() {
        let mut sched = Scheduler::new();
        let mut live = Fiber::at(10);
        assert!(!sched.yield_now(&mut live));
        assert_eq!(live.ip, 10);

        let worker = sched.spawn(50);
        assert_eq!(sched.current(), Some(0));
        assert!(sched.yield_now(&mut live));
        assert_eq!(sched.current(), Some(worker));
        assert_eq!(live.ip, 50);

        live.ip = 55;
        assert!(sched.yield_now(&mut live));
        assert_eq!(sched.current(), Some(0));
        assert_eq!(live.ip, 10);
    }

    #[test]
    fn test_finish_last_fiber_is_done() {
        let mut sched = Scheduler::new();
        let mut live = Fiber::at(3);
        assert_eq!(sched.finish(&mut live), FiberExit::Done);
        assert_eq!(sched.current(), None);
    }

    #[test]
    fn test_sleep_then_wake_in_order() {
        let mut sched = Scheduler::new();
        let mut live = Fiber::at(1);
        let b = sched.spawn(100);
        let now = Instant::now();

        sched.sleep(&mut live, now + Duration::from_millis(20));
        assert_eq!(sched.current(), Some(b));
        assert_eq!(live.ip, 100);

        sched.sleep(&mut live, now + Duration::from_millis(10));
        assert_eq!(sched.current(), None);
        assert_eq!(sched.next_wake(), Some(now + Duration::from_millis(10)));

        let woken = sched.wake_expired(now + Duration::from_millis(30), &mut live);
        assert_eq!(woken, 2);
        // b slept for the shorter time so it runs first
        assert_eq!(sched.current(), Some(b));
        assert_eq!(live.ip, 100);
        assert_eq!(sched.finish(&mut live), FiberExit::Resumed(0));
        assert_eq!(live.ip, 1);
    }

    #[test]
    fn test_finish_with_sleepers_goes_idle() {
        let mut sched = Scheduler::new();
        let mut live = Fiber::default();
        sched.spawn(7);
        sched.sleep(&mut live, Instant::now() + Duration::from_secs(60));
        assert_eq!(live.ip, 7);
        assert_eq!(sched.finish(&mut live), FiberExit::Idle);
        assert_eq!(sched.sleeping(), 1);
    }

    #[test]
    fn test_spawn_reuses_finished_slots() {
        let mut sched = Scheduler::new();
        let mut live = Fiber::default();
        let a = sched.spawn(5);
        sched.yield_now(&mut live);
        assert_eq!(sched.finish(&mut live), FiberExit::Resumed(0));
        assert_eq!(sched.spawn(9), a);
    }

    #[test]
    fn test_inside_draw_scans_all_frames() {
        let fiber = Fiber {
            draw_frames: vec![true, false],
            ..Fiber::default()
        };
        assert!(fiber.inside_draw());
        assert!(!Fiber::default().inside_draw());
    }

    #[test]
    fn test_frames_keep_their_own_array_shapes() {
        let mut fiber = Fiber::default();
        fiber.array_dims.insert(0, vec![2, 2]);
        fiber.push_frame(7, true);
        assert!(fiber.inside_draw());
        assert!(fiber.array_dims.is_empty());
        fiber.array_dims.insert(0, vec![5]);

        assert_eq!(fiber.pop_frame(), Some(7));
        assert!(!fiber.inside_draw());
        assert_eq!(fiber.array_dims.get(&0), Some(&vec![2, 2]));
        assert_eq!(fiber.pop_frame(), None);
    }
}
