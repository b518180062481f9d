//! Single-shot periodic task runner: a dedicated thread that invokes a bound
//! action every N microseconds until cancelled.
//!
//! The source interrupts a blocked syscall with `SIGUSR1` to cancel promptly;
//! this rewrite uses a `Condvar`-gated sleep instead (see DESIGN.md) — same
//! "cancel promptly, no busy-wait" guarantee, without touching process signal
//! disposition from library code.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

struct State {
    running: bool,
    period_us: u64,
}

pub struct PeriodicTask {
    state: Arc<(Mutex<State>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(target_os = "linux")]
fn apply_scheduling_policy(period_us: u64) {
    // Best-effort: request SCHED_DEADLINE for sub-second periods, falling back
    // silently (matching the source's "falls back silently on failure") since
    // it requires privileges most test/dev environments don't grant.
    if period_us == 0 {
        return;
    }
    unsafe {
        if period_us <= 1_000_000 {
            let runtime_ns = (period_us / 2) * 1_000;
            let deadline_ns = period_us * 1_000;
            let mut attr = SchedAttr {
                size: std::mem::size_of::<SchedAttr>() as u32,
                sched_policy: SCHED_DEADLINE,
                sched_flags: 0,
                sched_nice: 0,
                sched_priority: 0,
                sched_runtime: runtime_ns,
                sched_deadline: deadline_ns,
                sched_period: deadline_ns,
            };
            let _ = libc::syscall(SYS_SCHED_SETATTR, 0, &mut attr as *mut SchedAttr, 0u32);
        } else {
            let param = libc::sched_param { sched_priority: 0 };
            libc::sched_setscheduler(0, libc::SCHED_OTHER, &param);
        }
    }
}

#[cfg(target_os = "linux")]
const SYS_SCHED_SETATTR: libc::c_long = 314;
#[cfg(target_os = "linux")]
const SCHED_DEADLINE: u32 = 6;

#[cfg(target_os = "linux")]
#[repr(C)]
struct SchedAttr {
    size: u32,
    sched_policy: u32,
    sched_flags: u64,
    sched_nice: i32,
    sched_priority: u32,
    sched_runtime: u64,
    sched_deadline: u64,
    sched_period: u64,
}

#[cfg(not(target_os = "linux"))]
fn apply_scheduling_policy(_period_us: u64) {}

impl PeriodicTask {
    /// Spawns the runner thread immediately, invoking `action` every
    /// `period_us` microseconds until `join()` is called.
    pub fn start<F>(period_us: u64, action: F) -> PeriodicTask
    where
        F: Fn() + Send + 'static,
    {
        let state = Arc::new((Mutex::new(State { running: true, period_us }), Condvar::new()));
        let thread_state = Arc::clone(&state);

        let handle = thread::spawn(move || {
            let (lock, condvar) = &*thread_state;
            apply_scheduling_policy(period_us);
            loop {
                {
                    let guard = lock.lock().unwrap();
                    if !guard.running {
                        return;
                    }
                }
                action();

                let period = Duration::from_micros(lock.lock().unwrap().period_us);
                let guard = lock.lock().unwrap();
                let (guard, _) = condvar.wait_timeout_while(guard, period, |s| s.running).unwrap();
                if !guard.running {
                    return;
                }
            }
        });

        PeriodicTask { state, handle: Mutex::new(Some(handle)) }
    }

    /// Replaces the current period with `gcd(current, new_period_us)`, used to
    /// align multiple subscribers sharing one runner's rate.
    pub fn adjust_period(&self, new_period_us: u64) {
        let (lock, condvar) = &*self.state;
        let mut guard = lock.lock().unwrap();
        guard.period_us = gcd(guard.period_us, new_period_us);
        condvar.notify_all();
    }

    pub fn period_us(&self) -> u64 {
        self.state.0.lock().unwrap().period_us
    }

    /// Flips the running flag, wakes the sleeping thread, and joins it.
    pub fn join(&self) {
        {
            let (lock, condvar) = &*self.state;
            let mut guard = lock.lock().unwrap();
            guard.running = false;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[test]
    fn invokes_action_periodically() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let task = PeriodicTask::start(10_000, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(StdDuration::from_millis(55));
        task.join();

        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn join_stops_future_invocations() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let task = PeriodicTask::start(5_000, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(StdDuration::from_millis(20));
        task.join();
        let after_join = count.load(Ordering::SeqCst);
        thread::sleep(StdDuration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_join);
    }

    #[test]
    fn gcd_helper_reduces_period() {
        assert_eq!(gcd(500_000, 200_000), 100_000);
        assert_eq!(gcd(1_000, 0), 1_000);
    }

    #[test]
    fn adjust_period_takes_gcd_of_current_and_new() {
        let task = PeriodicTask::start(500_000, || {});
        task.adjust_period(200_000);
        assert_eq!(task.period_us(), 100_000);
        task.join();
    }
}
