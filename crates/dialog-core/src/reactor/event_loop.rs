use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::errors::{DialogError, DialogResult};

use super::scheduler::{Scheduler, TimerHandle};
use super::{guarded, panic_message};

/// A call marshaled onto the loop thread
pub type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

type SignalHandler<C> = Box<dyn FnMut(&mut C, i32) + Send>;

/// The context value owned by an [`EventLoop`]
pub trait Driver: Sized + 'static {
    type Timer: Clone;

    fn scheduler(&mut self) -> &mut Scheduler<Self::Timer>;

    /// A timer registered on [`Driver::scheduler`] is due
    fn on_timer(&mut self, handle: TimerHandle, timer: Self::Timer);

    /// Ask the loop to return `code` after the current callback
    fn break_loop(&mut self, code: i32);

    /// Exit code requested through [`Driver::break_loop`], if any
    fn take_exit(&mut self) -> Option<i32>;
}

/// Cloneable, thread-safe handle for marshaling calls onto the loop
pub struct ReactorHandle<C> {
    jobs: mpsc::UnboundedSender<Job<C>>,
}

impl<C> Clone for ReactorHandle<C> {
    fn clone(&self) -> Self {
        ReactorHandle { jobs: self.jobs.clone() }
    }
}

impl<C> std::fmt::Debug for ReactorHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle").field("closed", &self.jobs.is_closed()).finish()
    }
}

impl<C: 'static> ReactorHandle<C> {
    /// Queue `f` to run on the loop thread
    pub fn schedule<F>(&self, f: F) -> DialogResult<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.jobs.send(Box::new(f)).map_err(|_| DialogError::LoopClosed)
    }

    /// Run `f` on the loop thread and block until it returns.
    ///
    /// Must not be called from the loop thread itself or from async code;
    /// use [`ReactorHandle::call`] there.
    pub fn schedule_sync<R, F>(&self, f: F) -> DialogResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.schedule(move |ctx| {
            let result = catch_unwind(AssertUnwindSafe(|| f(ctx))).map_err(|p| panic_message(&*p));
            if let Err(msg) = &result {
                error!("unhandled panic in synchronous call: {}", msg);
            }
            let _ = tx.send(result);
        })?;
        match rx.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(msg)) => Err(DialogError::CallPanicked(msg)),
            Err(_) => Err(DialogError::LoopClosed),
        }
    }

    /// Async counterpart of [`ReactorHandle::schedule_sync`]
    pub async fn call<R, F>(&self, f: F) -> DialogResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.schedule(move |ctx| {
            let result = catch_unwind(AssertUnwindSafe(|| f(ctx))).map_err(|p| panic_message(&*p));
            let _ = tx.send(result);
        })?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(msg)) => Err(DialogError::CallPanicked(msg)),
            Err(_) => Err(DialogError::LoopClosed),
        }
    }

    /// Ask the loop to exit with `code`
    pub fn break_loop(&self, code: i32) -> DialogResult<()>
    where
        C: Driver,
    {
        self.schedule(move |ctx: &mut C| ctx.break_loop(code))
    }
}

/// Event loop driving a [`Driver`] context
pub struct EventLoop<C: Driver> {
    jobs_rx: mpsc::UnboundedReceiver<Job<C>>,
    handle: ReactorHandle<C>,
    signals_tx: mpsc::UnboundedSender<i32>,
    signals_rx: mpsc::UnboundedReceiver<i32>,
    signal_handlers: HashMap<i32, Vec<SignalHandler<C>>>,
    wake_interval: Duration,
}

impl<C: Driver> EventLoop<C> {
    /// `wake_interval` bounds how long the loop sleeps with nothing due
    pub fn new(wake_interval: Duration) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        EventLoop {
            jobs_rx,
            handle: ReactorHandle { jobs: jobs_tx },
            signals_tx,
            signals_rx,
            signal_handlers: HashMap::new(),
            wake_interval,
        }
    }

    pub fn handle(&self) -> ReactorHandle<C> {
        self.handle.clone()
    }

    /// Run `handler` on the loop thread whenever `signum` is delivered.
    ///
    /// Listening starts on first registration of a signal number and
    /// needs a running tokio runtime.
    pub fn register_signal<F>(&mut self, signum: i32, handler: F) -> DialogResult<()>
    where
        F: FnMut(&mut C, i32) + Send + 'static,
    {
        let first = !self.signal_handlers.contains_key(&signum);
        self.signal_handlers.entry(signum).or_default().push(Box::new(handler));
        if first {
            self.listen(signum)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn listen(&self, signum: i32) -> DialogResult<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut stream = signal(SignalKind::from_raw(signum))
            .map_err(|e| DialogError::Config(format!("cannot listen for signal {}: {}", signum, e)))?;
        let tx = self.signals_tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if tx.send(signum).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    #[cfg(not(unix))]
    fn listen(&self, signum: i32) -> DialogResult<()> {
        let tx = self.signals_tx.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(signum).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Run the handlers of `signum` now, as if it had been delivered
    pub fn deliver_signal(&mut self, ctx: &mut C, signum: i32) {
        let Some(handlers) = self.signal_handlers.get_mut(&signum) else {
            debug!("signal {} has no handlers", signum);
            return;
        };
        for handler in handlers.iter_mut() {
            guarded("signal handler", || handler(ctx, signum));
        }
    }

    /// Fire every timer due at the scheduler's current time
    pub fn fire_timers(&mut self, ctx: &mut C) -> usize {
        let mut fired = 0;
        while let Some((handle, timer)) = ctx.scheduler().pop_due() {
            guarded("timer", || ctx.on_timer(handle, timer));
            fired += 1;
        }
        fired
    }

    /// Process queued signals and jobs and due timers without waiting
    pub fn run_pending(&mut self, ctx: &mut C) -> usize {
        let mut processed = 0;
        while let Ok(signum) = self.signals_rx.try_recv() {
            self.deliver_signal(ctx, signum);
            processed += 1;
        }
        while let Ok(job) = self.jobs_rx.try_recv() {
            guarded("scheduled call", || job(ctx));
            processed += 1;
        }
        processed + self.fire_timers(ctx)
    }

    /// Run until [`Driver::break_loop`] is called or `timeout` elapses.
    ///
    /// Returns the exit code, or `None` on timeout.
    pub async fn run(&mut self, ctx: &mut C, timeout: Option<Duration>) -> Option<i32> {
        let deadline = timeout.map(|t| Instant::now() + t);
        info!("event loop started");
        loop {
            ctx.scheduler().set_now(Instant::now());
            self.fire_timers(ctx);
            if let Some(code) = ctx.take_exit() {
                info!("event loop stopped with code {}", code);
                return Some(code);
            }

            let now = Instant::now();
            let mut wake = now + self.wake_interval;
            if let Some(next) = ctx.scheduler().next_deadline() {
                wake = wake.min(next);
            }
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return None;
                }
                wake = wake.min(deadline);
            }

            // the clock is re-read after the wait so that timers armed by
            // the woken callback start from the current instant
            tokio::select! {
                Some(job) = self.jobs_rx.recv() => {
                    ctx.scheduler().set_now(Instant::now());
                    guarded("scheduled call", || job(ctx));
                }
                Some(signum) = self.signals_rx.recv() => {
                    ctx.scheduler().set_now(Instant::now());
                    self.deliver_signal(ctx, signum);
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {}
            }

            if let Some(code) = ctx.take_exit() {
                info!("event loop stopped with code {}", code);
                return Some(code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Repeat;

    #[derive(Default)]
    struct Counter {
        scheduler: Scheduler<&'static str>,
        fired: Vec<&'static str>,
        fired_at: Vec<Instant>,
        exit: Option<i32>,
    }

    impl Driver for Counter {
        type Timer = &'static str;

        fn scheduler(&mut self) -> &mut Scheduler<&'static str> {
            &mut self.scheduler
        }

        fn on_timer(&mut self, _handle: TimerHandle, timer: &'static str) {
            if timer == "boom" {
                panic!("timer blew up");
            }
            self.fired.push(timer);
            self.fired_at.push(Instant::now());
        }

        fn break_loop(&mut self, code: i32) {
            self.exit = Some(code);
        }

        fn take_exit(&mut self) -> Option<i32> {
            self.exit.take()
        }
    }

    #[test]
    fn test_panicking_timer_does_not_stop_others() {
        let mut ctx = Counter::default();
        let mut el = EventLoop::new(Duration::from_millis(10));
        ctx.scheduler.register(Duration::from_secs(1), Repeat::Once, "boom");
        ctx.scheduler.register(Duration::from_secs(1), Repeat::Once, "after");
        ctx.scheduler.advance(Duration::from_secs(1));
        assert_eq!(el.run_pending(&mut ctx), 2);
        assert_eq!(ctx.fired, vec!["after"]);
    }

    #[test]
    fn test_scheduled_jobs_run_in_order() {
        let mut ctx = Counter::default();
        let mut el = EventLoop::new(Duration::from_millis(10));
        let handle = el.handle();
        handle.schedule(|c: &mut Counter| c.fired.push("one")).unwrap();
        handle.schedule(|_: &mut Counter| panic!("job failure")).unwrap();
        handle.schedule(|c: &mut Counter| c.fired.push("two")).unwrap();
        el.run_pending(&mut ctx);
        assert_eq!(ctx.fired, vec!["one", "two"]);
    }

    #[test]
    fn test_signal_handlers() {
        let mut ctx = Counter::default();
        let mut el: EventLoop<Counter> = EventLoop::new(Duration::from_millis(10));
        el.signal_handlers
            .entry(15)
            .or_default()
            .push(Box::new(|c: &mut Counter, _| c.fired.push("term")));
        el.signals_tx.send(15).unwrap();
        el.run_pending(&mut ctx);
        assert_eq!(ctx.fired, vec!["term"]);
    }

    #[tokio::test]
    async fn test_run_until_break_from_other_thread() {
        let mut ctx = Counter::default();
        let mut el = EventLoop::new(Duration::from_millis(10));
        let handle = el.handle();
        let worker = std::thread::spawn(move || {
            let value = handle.schedule_sync(|c: &mut Counter| {
                c.fired.push("sync");
                41 + 1
            });
            handle.break_loop(7).unwrap();
            value
        });
        let code = el.run(&mut ctx, Some(Duration::from_secs(5))).await;
        assert_eq!(code, Some(7));
        assert_eq!(worker.join().unwrap().unwrap(), 42);
        assert_eq!(ctx.fired, vec!["sync"]);
    }

    #[tokio::test]
    async fn test_schedule_sync_reports_panic() {
        let mut ctx = Counter::default();
        let mut el = EventLoop::new(Duration::from_millis(10));
        let handle = el.handle();
        let worker = std::thread::spawn(move || {
            let res = handle.schedule_sync(|_: &mut Counter| -> u32 { panic!("nope") });
            handle.break_loop(0).unwrap();
            res
        });
        el.run(&mut ctx, Some(Duration::from_secs(5))).await;
        assert!(matches!(worker.join().unwrap(), Err(DialogError::CallPanicked(_))));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let mut ctx = Counter::default();
        let mut el = EventLoop::new(Duration::from_millis(5));
        ctx.scheduler.register(Duration::from_millis(1), Repeat::Once, "quick");
        let code = el.run(&mut ctx, Some(Duration::from_millis(50))).await;
        assert_eq!(code, None);
        assert_eq!(ctx.fired, vec!["quick"]);
    }

    #[tokio::test]
    async fn test_timer_armed_by_woken_job_starts_from_wakeup() {
        let mut ctx = Counter::default();
        // long wake interval: the loop is parked in select when the job lands
        let mut el = EventLoop::new(Duration::from_secs(1));
        let handle = el.handle();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            handle
                .schedule_sync(|c: &mut Counter| {
                    c.scheduler.register(Duration::from_millis(200), Repeat::Once, "retransmit");
                    Instant::now()
                })
                .unwrap()
        });
        el.run(&mut ctx, Some(Duration::from_millis(900))).await;
        let armed_at = worker.join().unwrap();
        assert_eq!(ctx.fired, vec!["retransmit"]);
        assert!(ctx.fired_at[0].duration_since(armed_at) >= Duration::from_millis(190));
    }
}
