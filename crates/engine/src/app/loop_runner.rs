use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use pixels::{Pixels, SurfaceTexture};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::app::config::StageConfig;
use crate::app::input::{TouchEvent, TouchPhase};
use crate::app::metrics::MetricsHandle;
use crate::app::rendering::stage::{Stage, StageError};
use crate::app::transform::Vec2;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to create the application window")]
    Window(#[source] winit::error::OsError),
    #[error("event loop error")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create the pixel surface")]
    Pixels(#[from] pixels::Error),
    #[error("render contract violated: {0}")]
    Stage(#[from] StageError),
}

/// What the update thread should do with the time that has passed since the
/// previous tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickPlan {
    Sleep(Duration),
    Run { dt: Duration },
    SkipStale,
}

fn plan_tick(elapsed: Duration, tick: Duration, stale_cap: Duration) -> TickPlan {
    if elapsed < tick {
        TickPlan::Sleep(tick - elapsed)
    } else if elapsed > stale_cap {
        TickPlan::SkipStale
    } else {
        TickPlan::Run { dt: elapsed }
    }
}

fn lock_stage(stage: &Mutex<Stage>) -> MutexGuard<'_, Stage> {
    match stage.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Starts an update thread bound to the current generation value. The thread
/// exits silently as soon as the generation moves on, so a stale thread can
/// never tick a stage that a newer thread owns.
fn spawn_update_thread(
    stage: Arc<Mutex<Stage>>,
    generation: Arc<AtomicU64>,
    target_ups: u32,
    stale_frame_ms: u64,
    metrics: MetricsHandle,
) {
    let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
    let tick = Duration::from_secs_f64(1.0 / target_ups.max(1) as f64);
    let stale_cap = Duration::from_millis(stale_frame_ms.max(1));

    let spawned = thread::Builder::new()
        .name("update".to_string())
        .spawn(move || {
            let mut last = Instant::now();
            loop {
                if generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }
                let now = Instant::now();
                match plan_tick(now - last, tick, stale_cap) {
                    TickPlan::Sleep(remaining) => thread::sleep(remaining),
                    TickPlan::Run { dt } => {
                        last = now;
                        lock_stage(&stage).advance(dt.as_secs_f32());
                        metrics.record_update();
                    }
                    TickPlan::SkipStale => {
                        last = now;
                        debug!("stale_tick_skipped");
                    }
                }
            }
        });
    if let Err(spawn_error) = spawned {
        error!(error = %spawn_error, "update_thread_spawn_failed");
    }
}

// The surface holds its own Arc clone of the window, so the returned
// pixels are not tied to the borrow.
fn build_pixels(window: &Arc<Window>) -> Result<Pixels<'static>, pixels::Error> {
    let size = window.inner_size();
    let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(window));
    Pixels::new(size.width.max(1), size.height.max(1), surface)
}

/// Runs the two-thread app loop: this thread owns the window, the surface,
/// rendering, and picking; a generation-guarded update thread ticks the
/// stage. The stage must already hold its first scene.
pub fn run_app(config: StageConfig, stage: Stage) -> Result<(), AppError> {
    info!(
        target_ups = config.target_ups,
        stale_frame_ms = config.stale_frame_ms,
        width = config.window_width,
        height = config.window_height,
        "loop_config"
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let window = WindowBuilder::new()
        .with_title(&config.window_title)
        .with_inner_size(LogicalSize::new(config.window_width, config.window_height))
        .build(&event_loop)
        .map_err(AppError::Window)?;
    let window = Arc::new(window);
    let mut pixels = build_pixels(&window)?;

    let size = window.inner_size();
    let stage = Arc::new(Mutex::new(stage));
    lock_stage(&stage).resize(size.width, size.height);
    let touch_sender = lock_stage(&stage).touch_sender();

    let generation = Arc::new(AtomicU64::new(0));
    let metrics = MetricsHandle::new();

    let target_ups = config.target_ups;
    let stale_frame_ms = config.stale_frame_ms;
    let mut cursor = Vec2::ZERO;
    let mut pointer_down = false;
    let mut last_frame_at = Instant::now();

    let loop_stage = Arc::clone(&stage);
    let loop_generation = Arc::clone(&generation);
    let loop_metrics = metrics.clone();
    event_loop.run(move |event, elwt| match event {
        Event::Resumed => {
            spawn_update_thread(
                Arc::clone(&loop_stage),
                Arc::clone(&loop_generation),
                target_ups,
                stale_frame_ms,
                loop_metrics.clone(),
            );
        }
        Event::Suspended => {
            loop_generation.fetch_add(1, Ordering::SeqCst);
        }
        Event::AboutToWait => {
            window.request_redraw();
        }
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                loop_generation.fetch_add(1, Ordering::SeqCst);
                elwt.exit();
            }
            WindowEvent::Resized(new_size) => {
                if new_size.width == 0 || new_size.height == 0 {
                    return;
                }
                if let Err(resize_error) = pixels.resize_surface(new_size.width, new_size.height) {
                    warn!(error = %resize_error, "surface_resize_failed");
                }
                if let Err(resize_error) = pixels.resize_buffer(new_size.width, new_size.height) {
                    warn!(error = %resize_error, "buffer_resize_failed");
                }
                lock_stage(&loop_stage).resize(new_size.width, new_size.height);
            }
            WindowEvent::CursorMoved { position, .. } => {
                let viewport = lock_stage(&loop_stage).viewport();
                cursor = viewport.screen_to_logical(position.x as f32, position.y as f32);
                if pointer_down {
                    touch_sender.send(TouchEvent {
                        phase: TouchPhase::Move,
                        pointer_id: 0,
                        position: cursor,
                    });
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let phase = match state {
                    ElementState::Pressed => {
                        pointer_down = true;
                        TouchPhase::Down
                    }
                    ElementState::Released => {
                        pointer_down = false;
                        TouchPhase::Up
                    }
                };
                touch_sender.send(TouchEvent {
                    phase,
                    pointer_id: 0,
                    position: cursor,
                });
            }
            WindowEvent::KeyboardInput { event, .. } => {
                // Escape stands in for the platform back button.
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && event.logical_key == Key::Named(NamedKey::Escape)
                {
                    if let Some(scene) = lock_stage(&loop_stage).current_scene_mut() {
                        scene.back();
                    }
                }
            }
            WindowEvent::Touch(touch) => {
                let viewport = lock_stage(&loop_stage).viewport();
                let position =
                    viewport.screen_to_logical(touch.location.x as f32, touch.location.y as f32);
                let phase = match touch.phase {
                    winit::event::TouchPhase::Started => TouchPhase::Down,
                    winit::event::TouchPhase::Moved => TouchPhase::Move,
                    winit::event::TouchPhase::Ended | winit::event::TouchPhase::Cancelled => {
                        TouchPhase::Up
                    }
                };
                touch_sender.send(TouchEvent {
                    phase,
                    pointer_id: touch.id as u32,
                    position,
                });
            }
            WindowEvent::RedrawRequested => {
                {
                    let mut stage = lock_stage(&loop_stage);
                    match stage.render_frame() {
                        Ok(frame) => {
                            let out = pixels.frame_mut();
                            if out.len() == frame.pixels().len() {
                                out.copy_from_slice(frame.pixels());
                            }
                        }
                        Err(stage_error) => {
                            // Rendering without a scene is a wiring bug, not
                            // a recoverable frame.
                            error!(error = %stage_error, "render_frame_failed");
                            loop_generation.fetch_add(1, Ordering::SeqCst);
                            elwt.exit();
                            return;
                        }
                    }
                    stage.run_picking();
                }
                if let Err(render_error) = pixels.render() {
                    warn!(error = %render_error, "surface_present_failed");
                }
                let now = Instant::now();
                loop_metrics.record_frame((now - last_frame_at).as_secs_f32());
                last_frame_at = now;
            }
            _ => {}
        },
        _ => {}
    })?;

    generation.fetch_add(1, Ordering::SeqCst);
    let snapshot = metrics.snapshot();
    info!(fps = snapshot.fps, ups = snapshot.ups, "loop_stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(20);
    const STALE: Duration = Duration::from_millis(64);

    #[test]
    fn early_wakeup_sleeps_for_the_remainder() {
        let plan = plan_tick(Duration::from_millis(5), TICK, STALE);
        assert_eq!(plan, TickPlan::Sleep(Duration::from_millis(15)));
    }

    #[test]
    fn on_time_tick_runs_with_real_elapsed_time() {
        let plan = plan_tick(Duration::from_millis(25), TICK, STALE);
        assert_eq!(
            plan,
            TickPlan::Run {
                dt: Duration::from_millis(25)
            }
        );
    }

    #[test]
    fn exactly_stale_cap_still_runs() {
        let plan = plan_tick(STALE, TICK, STALE);
        assert_eq!(plan, TickPlan::Run { dt: STALE });
    }

    #[test]
    fn older_than_stale_cap_is_skipped() {
        let plan = plan_tick(Duration::from_millis(65), TICK, STALE);
        assert_eq!(plan, TickPlan::SkipStale);
    }

    #[test]
    fn generation_bump_stops_spawned_thread() {
        use crate::app::texture::{Texture, TextureError, TextureProvider, TextureQueue};

        struct NullProvider;
        impl TextureProvider for NullProvider {
            fn load(&self, _key: &str) -> Result<Texture, TextureError> {
                Ok(Texture::from_rgba(1, 1, vec![0, 0, 0, 255]).unwrap())
            }
        }

        let stage = Arc::new(Mutex::new(Stage::new(
            8,
            8,
            TextureQueue::new(Arc::new(NullProvider)),
        )));
        let generation = Arc::new(AtomicU64::new(0));
        let metrics = MetricsHandle::new();
        spawn_update_thread(
            Arc::clone(&stage),
            Arc::clone(&generation),
            100,
            64,
            metrics,
        );

        thread::sleep(Duration::from_millis(50));
        generation.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));

        // The stale thread must have exited: a new lock is uncontended and
        // the stage is still usable.
        assert!(!lock_stage(&stage).has_scene());
    }
}
