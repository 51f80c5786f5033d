//! Background preview rendering.
//!
//! A single worker thread owns the pixel work.  The control side only
//! ever touches the shared state under one lock, raises `restart` when
//! its change affects the output, and wakes the worker.  Full renders
//! check `restart` before every row and throw away a stale frame as soon
//! as they see it.  Patch renders (feedback for mask edits) always run to
//! completion.

use std::{
    collections::VecDeque,
    sync::{mpsc, Arc, Condvar, Mutex, MutexGuard},
    thread::JoinHandle,
};

use crate::{error::RenderError, ExposureStack, GammaLut};

/// A rectangle in display pixels, `min` inclusive and `max` exclusive.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Viewport {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

impl Viewport {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Viewport {
        Viewport {
            min_x: x,
            min_y: y,
            max_x: x + width,
            max_y: y + height,
        }
    }

    pub fn width(&self) -> usize {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> usize {
        self.max_y.saturating_sub(self.min_y)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// The part of the viewport that lies inside a `width` x `height`
    /// image.
    pub fn clipped(&self, width: usize, height: usize) -> Viewport {
        Viewport {
            min_x: self.min_x.min(width),
            min_y: self.min_y.min(height),
            max_x: self.max_x.min(width),
            max_y: self.max_y.min(height),
        }
    }
}

/// Whether a render may be abandoned for a newer parameter set.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RenderMode {
    /// Cancellable at row granularity.
    Full,
    /// Localized feedback for an edit.  Never cancelled.
    Patch,
}

/// What the worker is currently doing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerState {
    Waiting,
    RenderingFull,
    RenderingPatch,
    Terminated,
}

/// A finished block of gamma-mapped preview pixels.
///
/// Everything is in display pixels at `scale`.  `full_width` and
/// `full_height` are the size of the whole image at that scale.
#[derive(Debug, Clone)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
    pub full_width: usize,
    pub full_height: usize,
    pub scale: usize,
    pub mode: RenderMode,
    pub pixels: Vec<[u8; 3]>,
}

impl Tile {
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        self.pixels[y * self.width + x]
    }
}

#[derive(Debug)]
pub enum RenderEvent {
    Tile(Tile),
    Failed(RenderError),
}

/// Receives what the render thread produces.
///
/// Called from the worker thread, without any lock held.
pub trait PresentationSink: Send {
    fn present(&mut self, event: RenderEvent);
}

impl PresentationSink for mpsc::Sender<RenderEvent> {
    fn present(&mut self, event: RenderEvent) {
        // A hung-up receiver just means nobody is watching anymore.
        let _ = self.send(event);
    }
}

pub const DEFAULT_GAMMA: f32 = 2.2;

/// Converts an 8-bit threshold level into the 16-bit clipping threshold:
/// one below the first sample of the next 8-bit step.
pub fn threshold_from_level(level: u8) -> u16 {
    (((level as u32 + 1) << 8) - 1) as u16
}

/// A mask edit waiting for its patch render, in source pixels.
#[derive(Debug, Copy, Clone)]
struct Patch {
    x: usize,
    y: usize,
    radius: usize,
}

struct RenderState {
    stack: ExposureStack,
    gamma: GammaLut,

    // Requested parameters, applied to the stack by the worker.
    viewport: Viewport,
    scale: usize,

    patches: VecDeque<Patch>,
    restart: bool,
    abort: bool,

    worker_state: WorkerState,
    completed_passes: usize,
    abandoned_passes: usize,
}

struct Shared {
    state: Mutex<RenderState>,
    condition: Condvar,
}

impl Shared {
    fn new(stack: ExposureStack, gamma: f32) -> Shared {
        let scale = stack.scale();
        Shared {
            state: Mutex::new(RenderState {
                stack: stack,
                gamma: GammaLut::new(gamma),
                viewport: Viewport::default(),
                scale: scale,
                patches: VecDeque::new(),
                // Render whatever we were given right away.
                restart: true,
                abort: false,
                worker_state: WorkerState::Waiting,
                completed_passes: 0,
                abandoned_passes: 0,
            }),
            condition: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap()
    }

    /// Applies a change that affects rendered output and wakes the worker.
    fn mutate<R, F: FnOnce(&mut RenderState) -> R>(&self, f: F) -> R {
        let result = {
            let mut state = self.lock();
            let result = f(&mut *state);
            state.restart = true;
            result
        };
        self.condition.notify_one();
        result
    }
}

/// Owns the exposure stack and the thread that renders previews of it.
pub struct RenderThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn new<S: PresentationSink + 'static>(
        stack: ExposureStack,
        gamma: f32,
        sink: S,
    ) -> RenderThread {
        let shared = Arc::new(Shared::new(stack, gamma));

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("render".into())
            .spawn(move || Worker::new(worker_shared, Box::new(sink)).run())
            .expect("failed to spawn the render thread");

        RenderThread {
            shared: shared,
            handle: Some(handle),
        }
    }

    pub fn set_gamma(&self, gamma: f32) {
        self.shared.mutate(|state| state.gamma.regenerate(gamma));
    }

    pub fn gamma(&self) -> f32 {
        self.shared.lock().gamma.gamma()
    }

    /// Sets layer `index`'s clipping threshold from an 8-bit level.
    pub fn set_exposure_threshold(&self, index: usize, level: u8) {
        self.shared.mutate(|state| {
            state
                .stack
                .set_threshold(index, threshold_from_level(level))
        });
    }

    pub fn set_exposure_relative_ev(&self, index: usize, relative_exposure: f32) {
        self.shared
            .mutate(|state| state.stack.set_relative_exposure(index, relative_exposure));
    }

    /// Sets the visible region, in display pixels at `scale`.
    ///
    /// Only a change of scale triggers a new render; a pan is served
    /// from the last whole-image pass until something else changes.
    pub fn set_image_viewport(&self, x: usize, y: usize, width: usize, height: usize, scale: usize) {
        assert!(scale >= 1, "display scale must be at least 1");
        let wake = {
            let mut state = self.shared.lock();
            if scale != state.scale {
                state.restart = true;
                state.scale = scale;
            }
            state.viewport = Viewport::new(x, y, width, height);
            state.restart
        };
        if wake {
            self.shared.condition.notify_one();
        }
    }

    /// Forces layer `index` to be used within `radius` of source pixel
    /// `(x, y)`, and renders a patch there.
    pub fn include_pixels(&self, index: usize, x: usize, y: usize, radius: usize) {
        self.shared.mutate(|state| {
            state.stack.include_pixels(index, x, y, radius);
            state.patches.push_back(Patch { x, y, radius });
        });
    }

    /// Keeps layer `index` out of the merge within `radius` of source
    /// pixel `(x, y)`, and renders a patch there.
    pub fn exclude_pixels(&self, index: usize, x: usize, y: usize, radius: usize) {
        self.shared.mutate(|state| {
            state.stack.exclude_pixels(index, x, y, radius);
            state.patches.push_back(Patch { x, y, radius });
        });
    }

    /// Re-renders with the current parameters.
    pub fn request_render(&self) {
        self.shared.mutate(|_| {});
    }

    /// Read-only access to the stack.  Holds the shared lock, so keep it
    /// short.
    pub fn with_stack<R, F: FnOnce(&ExposureStack) -> R>(&self, f: F) -> R {
        f(&self.shared.lock().stack)
    }

    /// Mutable access to the stack.  Always triggers a new render.
    pub fn with_stack_mut<R, F: FnOnce(&mut ExposureStack) -> R>(&self, f: F) -> R {
        self.shared.mutate(|state| f(&mut state.stack))
    }

    pub fn worker_state(&self) -> WorkerState {
        self.shared.lock().worker_state
    }

    /// (completed, abandoned) full-render passes so far.
    pub fn pass_counts(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.completed_passes, state.abandoned_passes)
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shared.lock().abort = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("render thread panicked");
            }
        }
    }
}

//-------------------------------------------------------------

struct Worker {
    shared: Arc<Shared>,
    sink: Box<dyn PresentationSink>,
}

impl Worker {
    fn new(shared: Arc<Shared>, sink: Box<dyn PresentationSink>) -> Worker {
        Worker {
            shared: shared,
            sink: sink,
        }
    }

    fn run(mut self) {
        loop {
            let mut patch_tiles = Vec::new();
            let viewport = {
                let mut state = self.shared.lock();
                state.worker_state = WorkerState::Waiting;
                while !state.abort && !state.restart && state.patches.is_empty() {
                    state = self.shared.condition.wait(state).unwrap();
                }
                if state.abort {
                    state.worker_state = WorkerState::Terminated;
                    return;
                }

                let honor_restart = state.restart;
                if honor_restart {
                    state.restart = false;
                    let scale = state.scale;
                    state.stack.set_scale(scale);
                }

                if state.stack.is_empty() {
                    state.patches.clear();
                    continue;
                }

                // Patches go first, all under this one lock so that
                // nothing can interrupt them.
                if !state.patches.is_empty() {
                    state.worker_state = WorkerState::RenderingPatch;
                    while let Some(patch) = state.patches.pop_front() {
                        patch_tiles.push(render_patch(&state, patch));
                    }
                }

                if honor_restart {
                    state.worker_state = WorkerState::RenderingFull;
                    Some(state.viewport)
                } else {
                    None
                }
            };

            for tile in patch_tiles {
                self.emit(tile);
            }

            let viewport = match viewport {
                Some(viewport) => viewport,
                None => continue,
            };

            // The visible region first, then the whole image so that
            // panning around doesn't need a fresh render.
            if !viewport.is_empty() {
                match self.render_full(Some(viewport)) {
                    Some(result) => self.emit(result),
                    None => continue,
                }
            }
            match self.render_full(None) {
                Some(result) => {
                    if result.is_ok() {
                        self.shared.lock().completed_passes += 1;
                    }
                    self.emit(result);
                }
                None => continue,
            }
        }
    }

    fn emit(&mut self, result: Result<Tile, RenderError>) {
        match result {
            Ok(tile) => {
                tracing::trace!(
                    "tile {:?} at ({}, {}), {}x{}",
                    tile.mode,
                    tile.x,
                    tile.y,
                    tile.width,
                    tile.height
                );
                self.sink.present(RenderEvent::Tile(tile));
            }
            Err(e) => {
                tracing::error!("render failed: {}", e);
                self.sink.present(RenderEvent::Failed(e));
            }
        }
    }

    /// Renders `region` (or the whole image) row by row, taking the lock
    /// for one row at a time.
    ///
    /// Returns `None` if the render was abandoned because of a restart
    /// or abort.
    fn render_full(&self, region: Option<Viewport>) -> Option<Result<Tile, RenderError>> {
        let (region, full_width, full_height, scale) = {
            let state = self.shared.lock();
            let full_width = state.stack.scaled_width();
            let full_height = state.stack.scaled_height();
            let region = region
                .unwrap_or_else(|| Viewport::new(0, 0, full_width, full_height))
                .clipped(full_width, full_height);
            (region, full_width, full_height, state.stack.scale())
        };

        let mut tile = match alloc_tile(region, full_width, full_height, scale, RenderMode::Full) {
            Ok(tile) => tile,
            Err(e) => return Some(Err(e)),
        };

        for row in region.min_y..region.max_y {
            let mut state = self.shared.lock();
            if state.abort || state.restart {
                state.abandoned_passes += 1;
                tracing::debug!(
                    "abandoned render of {:?} at row {}",
                    region,
                    row - region.min_y
                );
                return None;
            }
            render_row(&state, row, region.min_x, region.max_x, &mut tile.pixels);
        }

        tracing::debug!("rendered {:?} at scale {}", region, scale);
        Some(Ok(tile))
    }
}

fn alloc_tile(
    region: Viewport,
    full_width: usize,
    full_height: usize,
    scale: usize,
    mode: RenderMode,
) -> Result<Tile, RenderError> {
    let out_of_memory = RenderError::OutOfMemory {
        width: region.width(),
        height: region.height(),
    };
    let len = region
        .width()
        .checked_mul(region.height())
        .ok_or_else(|| out_of_memory.clone())?;
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(len).map_err(|_| out_of_memory)?;

    Ok(Tile {
        x: region.min_x,
        y: region.min_y,
        width: region.width(),
        height: region.height(),
        full_width: full_width,
        full_height: full_height,
        scale: scale,
        mode: mode,
        pixels: pixels,
    })
}

fn render_row(state: &RenderState, row: usize, min_x: usize, max_x: usize, out: &mut Vec<[u8; 3]>) {
    for col in min_x..max_x {
        out.push(state.gamma.map_rgb(state.stack.rgb(col, row)));
    }
}

/// Renders the display-space square covering a mask edit.  The caller
/// holds the lock for the whole patch.
fn render_patch(state: &RenderState, patch: Patch) -> Result<Tile, RenderError> {
    let scale = state.stack.scale();
    let full_width = state.stack.scaled_width();
    let full_height = state.stack.scaled_height();
    let region = Viewport {
        min_x: patch.x.saturating_sub(patch.radius) / scale,
        min_y: patch.y.saturating_sub(patch.radius) / scale,
        max_x: (patch.x.saturating_add(patch.radius) / scale).saturating_add(1),
        max_y: (patch.y.saturating_add(patch.radius) / scale).saturating_add(1),
    }
    .clipped(full_width, full_height);

    let mut tile = alloc_tile(region, full_width, full_height, scale, RenderMode::Patch)?;
    for row in region.min_y..region.max_y {
        render_row(state, row, region.min_x, region.max_x, &mut tile.pixels);
    }
    Ok(tile)
}
