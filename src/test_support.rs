//! Test doubles shared by the unit tests: a strip that records what it is
//! sent, a manually driven clock, a frame source with scripted timing and a
//! state store that cannot write.

use crate::error::{JumbotronError, Result};
use crate::persistence::{SavedState, StateStore};
use crate::pixel::Pixel;
use crate::playback::{CancelToken, Clock};
use crate::strip::{StripSink, physical_index, render_strip};
use crate::{Color, PanelConfig};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const HISTORY_LIMIT: usize = 10_000;

// ── Clock ────────────────────────────────────────────────────────────

/// Clock that only moves when slept on or advanced.
#[derive(Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        std::thread::yield_now();
    }
}

// ── Strip ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    count: usize,
    frames: Vec<Vec<Color>>,
    times: Vec<Duration>,
}

/// Strip that keeps every frame it is sent. Clones share the record.
#[derive(Clone)]
pub struct RecordingStrip {
    panel: PanelConfig,
    recorded: Arc<Mutex<Recorded>>,
    failing: Arc<AtomicBool>,
    clock: Option<Arc<FakeClock>>,
}

impl RecordingStrip {
    pub fn new(panel: PanelConfig) -> Self {
        Self {
            panel,
            recorded: Arc::default(),
            failing: Arc::default(),
            clock: None,
        }
    }

    /// Also stamp each push with the fake clock's time.
    pub fn with_clock(panel: PanelConfig, clock: Arc<FakeClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new(panel)
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn push_count(&self) -> usize {
        self.recorded.lock().unwrap().count
    }

    pub fn last_frame(&self) -> Option<Vec<Color>> {
        self.recorded.lock().unwrap().frames.last().cloned()
    }

    pub fn push_times(&self) -> Vec<Duration> {
        self.recorded.lock().unwrap().times.clone()
    }

    /// Output red channel of the top-left cell, per push.
    pub fn pushed_reds(&self) -> Vec<u8> {
        let idx = physical_index(self.panel, 0, 0);
        self.recorded
            .lock()
            .unwrap()
            .frames
            .iter()
            .map(|frame| frame[idx].r)
            .collect()
    }
}

impl StripSink for RecordingStrip {
    fn push(&mut self, grid: &[Vec<Pixel>]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JumbotronError::DeviceWriteFailure("unplugged".into()));
        }
        let mut rec = self.recorded.lock().unwrap();
        rec.count += 1;
        if rec.frames.len() < HISTORY_LIMIT {
            rec.frames.push(render_strip(self.panel, grid));
            if let Some(clock) = &self.clock {
                rec.times.push(clock.now());
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Strip whose every push takes `delay` of real time.
pub struct SlowStrip {
    delay: Duration,
}

impl SlowStrip {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl StripSink for SlowStrip {
    fn push(&mut self, _grid: &[Vec<Pixel>]) -> Result<()> {
        std::thread::sleep(self.delay);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

// ── State store ──────────────────────────────────────────────────────

/// Store whose disk is always full. Nothing was ever saved.
pub struct FailingStateStore;

impl StateStore for FailingStateStore {
    fn save(&self, _state: &SavedState) -> Result<()> {
        Err(JumbotronError::Storage(std::io::Error::other("disk full")))
    }

    fn load(&self) -> Option<SavedState> {
        None
    }
}

// ── Frame source ─────────────────────────────────────────────────────

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Source yielding solid 2x2 frames whose red channel is the given shade.
pub struct ScriptedSource {
    name: String,
    shades: Vec<u8>,
    next: usize,
    calls: usize,
    produced: usize,
    rewinds: usize,
    clock: Option<Arc<FakeClock>>,
    costs: HashMap<usize, Duration>,
    on_frame: Option<(usize, Box<dyn FnMut()>)>,
    cancel_when_exhausted: Option<CancelToken>,
    cancel_after: Option<(usize, CancelToken)>,
    fail_at: Option<usize>,
    log: Option<EventLog>,
    logged_frame: bool,
}

impl ScriptedSource {
    pub fn new(name: &str, shades: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            shades: shades.to_vec(),
            next: 0,
            calls: 0,
            produced: 0,
            rewinds: 0,
            clock: None,
            costs: HashMap::new(),
            on_frame: None,
            cancel_when_exhausted: None,
            cancel_after: None,
            fail_at: None,
            log: None,
            logged_frame: false,
        }
    }

    pub fn event_log() -> EventLog {
        Arc::default()
    }

    pub fn with_clock(mut self, clock: Arc<FakeClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Decoding frame `index` takes `cost` on the fake clock.
    pub fn with_cost(mut self, index: usize, cost: Duration) -> Self {
        self.costs.insert(index, cost);
        self
    }

    /// Run `f` while decoding frame `index`.
    pub fn on_frame(mut self, index: usize, f: impl FnMut() + 'static) -> Self {
        self.on_frame = Some((index, Box::new(f)));
        self
    }

    pub fn cancel_when_exhausted(mut self, token: CancelToken) -> Self {
        self.cancel_when_exhausted = Some(token);
        self
    }

    pub fn cancel_after_frames(mut self, frames: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((frames, token));
        self
    }

    /// The `call`-th `next_frame` call (0-based) returns an error.
    pub fn fail_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Log `open:<name>` now, `frame:<name>` on the first frame and
    /// `drop:<name>` when dropped.
    pub fn with_log(mut self, log: EventLog) -> Self {
        log.lock().unwrap().push(format!("open:{}", self.name));
        self.log = Some(log);
        self
    }

    pub fn rewinds(&self) -> usize {
        self.rewinds
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("{}:{}", event, self.name));
        }
    }
}

impl crate::video::FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_at == Some(call) {
            return Err(JumbotronError::SourceUnreadable("scripted failure".into()));
        }

        let Some(&shade) = self.shades.get(self.next) else {
            if let Some(token) = &self.cancel_when_exhausted {
                token.cancel();
            }
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;

        if let (Some(clock), Some(cost)) = (&self.clock, self.costs.get(&index)) {
            clock.advance(*cost);
        }
        if let Some((at, f)) = &mut self.on_frame {
            if *at == index {
                f();
            }
        }

        self.produced += 1;
        if let Some((limit, token)) = &self.cancel_after {
            if self.produced >= *limit {
                token.cancel();
            }
        }
        if !self.logged_frame {
            self.logged_frame = true;
            self.record("frame");
        }

        Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            2,
            2,
            Rgb([shade, 0, 0]),
        ))))
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        self.rewinds += 1;
        Ok(())
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.record("drop");
    }
}

/// Poll `cond` for up to five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
