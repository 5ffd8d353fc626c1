use std::sync::{Arc, RwLock};

/// Rates over the last completed one-second window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub fps: f32,
    pub ups: f32,
    pub last_frame_ms: f32,
}

#[derive(Default)]
struct MetricsState {
    frames: u32,
    updates: u32,
    window_seconds: f32,
    snapshot: LoopMetricsSnapshot,
}

/// Shared between the render and update threads. A poisoned lock is
/// recovered rather than propagated; metrics are advisory.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, frame_seconds: f32) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.frames += 1;
        state.window_seconds += frame_seconds;
        state.snapshot.last_frame_ms = frame_seconds * 1000.0;
        if state.window_seconds >= 1.0 {
            state.snapshot.fps = state.frames as f32 / state.window_seconds;
            state.snapshot.ups = state.updates as f32 / state.window_seconds;
            state.frames = 0;
            state.updates = 0;
            state.window_seconds = 0.0;
        }
    }

    pub fn record_update(&self) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.updates += 1;
    }

    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        match self.state.read() {
            Ok(state) => state.snapshot,
            Err(poisoned) => poisoned.into_inner().snapshot,
        }
    }
}
