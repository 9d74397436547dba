//! Playback clock.
//!
//! [`PlaybackClock`] is the single authoritative media time. While playing
//! it advances on every tick of a [`TickSource`] and broadcasts a
//! [`ClockMessage`] over a `watch` channel. Consumers hold a [`ClockHandle`]
//! and extrapolate between broadcasts from the capture instant, so they get
//! sub-tick resolution without a message per query.

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};

/// Host frame callback abstraction driving the clock loop.
#[async_trait]
pub trait TickSource: Send {
    /// Resolves on the next host frame and returns its timestamp.
    async fn next_tick(&mut self) -> Instant;

    /// Drops any schedule carried over from a previous run. Called each
    /// time the clock starts playing.
    fn restart(&mut self) {}
}

/// Fixed-period ticks. Missed ticks are skipped rather than bunched up.
pub struct IntervalTicks {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalTicks {
    /// Ticks every `period`, first tick immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_micros(1)),
            interval: None,
        }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Instant {
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await
    }

    fn restart(&mut self) {
        self.interval = None;
    }
}

/// Media time paired with the instant it was computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Seconds.
    pub media_time: f64,
    /// When `media_time` was taken.
    pub captured_at: Instant,
    /// Whether the clock was advancing.
    pub running: bool,
}

impl ClockSample {
    /// Media time at `now`, extrapolated when the clock is running.
    pub fn time_at(&self, now: Instant) -> f64 {
        if self.running {
            self.media_time + now.saturating_duration_since(self.captured_at).as_secs_f64()
        } else {
            self.media_time
        }
    }
}

/// Broadcast on every transport change and every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockMessage {
    /// Playback started.
    Play(ClockSample),
    /// Playback paused.
    Pause(ClockSample),
    /// Position changed by a seek or reset.
    Seek(ClockSample),
    /// Regular advance while playing.
    Tick(ClockSample),
}

impl ClockMessage {
    /// The sample carried by the message.
    pub fn sample(&self) -> ClockSample {
        match self {
            ClockMessage::Play(sample)
            | ClockMessage::Pause(sample)
            | ClockMessage::Seek(sample)
            | ClockMessage::Tick(sample) => *sample,
        }
    }
}

/// Transport commands, for callers that route control through a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    /// Start advancing.
    Play,
    /// Stop advancing.
    Pause,
    /// Seconds.
    Seek(f64),
    /// Pause and return to zero.
    Reset,
}

#[derive(Debug)]
struct ClockState {
    accumulated: Duration,
    resumed_at: Option<Instant>,
    current: f64,
}

impl ClockState {
    fn elapsed(&self, now: Instant) -> Duration {
        match self.resumed_at {
            Some(resumed_at) => self.accumulated + now.saturating_duration_since(resumed_at),
            None => self.accumulated,
        }
    }

    fn sample(&self, now: Instant) -> ClockSample {
        ClockSample {
            media_time: self.current,
            captured_at: now,
            running: self.resumed_at.is_some(),
        }
    }
}

/// Authoritative media time for one playback session.
pub struct PlaybackClock {
    state: Arc<Mutex<ClockState>>,
    sender: Arc<watch::Sender<ClockMessage>>,
    ticks: Arc<tokio::sync::Mutex<Box<dyn TickSource>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackClock {
    /// A paused clock at zero ticking on the configured interval.
    pub fn new(config: &PlaybackConfig) -> Self {
        Self::with_ticks(Box::new(IntervalTicks::new(config.tick_interval)))
    }

    /// A paused clock at zero driven by a custom tick source.
    pub fn with_ticks(ticks: Box<dyn TickSource>) -> Self {
        let state = ClockState {
            accumulated: Duration::ZERO,
            resumed_at: None,
            current: 0.0,
        };
        let (sender, _) = watch::channel(ClockMessage::Pause(state.sample(Instant::now())));
        Self {
            state: Arc::new(Mutex::new(state)),
            sender: Arc::new(sender),
            ticks: Arc::new(tokio::sync::Mutex::new(ticks)),
            task: Mutex::new(None),
        }
    }

    /// Starts advancing. No-op when already playing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn play(&self) {
        let mut task = self.task.lock();
        let sample = {
            let mut state = self.state.lock();
            if state.resumed_at.is_some() {
                return;
            }
            let now = Instant::now();
            state.resumed_at = Some(now);
            state.sample(now)
        };
        debug!("clock play at {:.3}s", sample.media_time);
        self.sender.send_replace(ClockMessage::Play(sample));

        *task = Some(tokio::spawn(tick_loop(
            self.state.clone(),
            self.sender.clone(),
            self.ticks.clone(),
        )));
    }

    /// Stops advancing and keeps the elapsed time. No-op when paused.
    pub fn pause(&self) {
        let mut task = self.task.lock();
        if let Some(task) = task.take() {
            task.abort();
        }
        let sample = {
            let mut state = self.state.lock();
            if state.resumed_at.is_none() {
                return;
            }
            let now = Instant::now();
            state.accumulated = state.elapsed(now);
            state.resumed_at = None;
            state.current = state.accumulated.as_secs_f64();
            state.sample(now)
        };
        debug!("clock pause at {:.3}s", sample.media_time);
        self.sender.send_replace(ClockMessage::Pause(sample));
    }

    /// Pauses and returns to zero.
    pub fn reset(&self) {
        self.pause();
        self.seek(0.0);
    }

    /// Jumps to `seconds`. A playing clock keeps playing from there.
    /// Negative and non-finite positions clamp to zero.
    pub fn seek(&self, seconds: f64) {
        let position = if seconds.is_finite() && seconds > 0.0 {
            Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        let sample = {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.accumulated = position;
            if state.resumed_at.is_some() {
                state.resumed_at = Some(now);
            }
            state.current = position.as_secs_f64();
            state.sample(now)
        };
        self.sender.send_replace(ClockMessage::Seek(sample));
    }

    /// Runs a transport command.
    pub fn apply(&self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => self.pause(),
            PlaybackCommand::Seek(seconds) => self.seek(seconds),
            PlaybackCommand::Reset => self.reset(),
        }
    }

    /// Seconds as of the last tick, pause or seek. Not extrapolated.
    pub fn get_current_time(&self) -> f64 {
        self.state.lock().current
    }

    /// Whether the clock is advancing.
    pub fn is_playing(&self) -> bool {
        self.state.lock().resumed_at.is_some()
    }

    /// A read handle for another task or thread.
    pub fn subscribe(&self) -> ClockHandle {
        ClockHandle {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn tick_loop(
    state: Arc<Mutex<ClockState>>,
    sender: Arc<watch::Sender<ClockMessage>>,
    ticks: Arc<tokio::sync::Mutex<Box<dyn TickSource>>>,
) {
    // A previous loop releases the source once its abort lands.
    let mut ticks = ticks.lock().await;
    ticks.restart();
    loop {
        let tick = ticks.next_tick().await;
        let sample = {
            let mut state = state.lock();
            let Some(resumed_at) = state.resumed_at else {
                return;
            };
            // A tick scheduled before the resume must not date the sample.
            let now = tick.max(resumed_at);
            state.current = state.elapsed(now).as_secs_f64();
            state.sample(now)
        };
        sender.send_replace(ClockMessage::Tick(sample));
    }
}

/// Read side of the clock for other contexts.
#[derive(Debug, Clone)]
pub struct ClockHandle {
    receiver: watch::Receiver<ClockMessage>,
}

impl ClockHandle {
    /// Seconds, extrapolated from the last broadcast while playing.
    pub fn current_time(&self) -> f64 {
        self.sample().time_at(Instant::now())
    }

    /// [`current_time`](Self::current_time) in whole microseconds.
    pub fn current_time_us(&self) -> i64 {
        (self.current_time() * 1_000_000.0).round() as i64
    }

    /// Last broadcast sample.
    pub fn sample(&self) -> ClockSample {
        self.receiver.borrow().sample()
    }

    /// Whether the last broadcast was taken while playing.
    pub fn is_running(&self) -> bool {
        self.sample().running
    }

    /// Waits for the next broadcast. Fails once the clock is dropped.
    pub async fn changed(&mut self) -> Result<ClockMessage> {
        self.receiver
            .changed()
            .await
            .map_err(|_| ClipError::Closed)?;
        Ok(*self.receiver.borrow_and_update())
    }
}
