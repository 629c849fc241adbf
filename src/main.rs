//! Peep Detection - Main Entry Point
//!
//! Mirrored webcam view with pose or face keypoints drawn on top, and a
//! privacy filter hiding everyone except the person closest to the center.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use peep_detection::args::Args;
use peep_detection::camera::CameraCapture;
use peep_detection::config::AppConfig;
use peep_detection::telemetry::init_logging;
use peep_detection::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Peep Detection";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized,
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: App },
    /// Window or graphics setup failed
    Failed,
}

/// Main application handler implementing winit's ApplicationHandler trait
struct PeepDetectionApp {
    state: AppState,
    config: AppConfig,
    frame_duration: Duration,
    next_redraw_at: Instant,
}

impl PeepDetectionApp {
    fn new(config: AppConfig) -> Self {
        let fps = config.target_fps.max(1);
        Self {
            state: AppState::Uninitialized,
            config,
            frame_duration: Duration::from_nanos(1_000_000_000u64 / fps as u64),
            next_redraw_at: Instant::now(),
        }
    }

    fn failed(&self) -> bool {
        matches!(self.state, AppState::Failed)
    }
}

impl ApplicationHandler for PeepDetectionApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                self.state = AppState::Failed;
                event_loop.exit();
                return;
            }
        };

        tracing::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        match pollster::block_on(App::new(window.clone(), &self.config)) {
            Ok(app) => {
                tracing::info!("Press P to toggle privacy, 1-3 for overlay style, ESC to exit");
                self.state = AppState::Running { window, app };
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.state = AppState::Failed;
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    tracing::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
                    }
                }
                KeyCode::KeyP => app.toggle_privacy(),
                KeyCode::Digit1 => app.select_style(0),
                KeyCode::Digit2 => app.select_style(1),
                KeyCode::Digit3 => app.select_style(2),
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        tracing::warn!("Surface lost, reconfiguring...");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        tracing::error!("Out of GPU memory!");
                        event_loop.exit();
                    }
                    Err(e) => {
                        tracing::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        let now = Instant::now();
        if now >= self.next_redraw_at {
            window.request_redraw();
            self.next_redraw_at += self.frame_duration;

            // Reset if too far behind
            if now > self.next_redraw_at + self.frame_duration * 2 {
                self.next_redraw_at = now + self.frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_redraw_at));
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (mut config, config_error) = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    args.apply(&mut config);

    let _log_guard = match init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(e) = config_error {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("Peep Detection v{}", env!("CARGO_PKG_VERSION"));

    if args.write_config {
        let Some(path) = args.config.clone().or_else(AppConfig::default_path) else {
            tracing::error!("No user config directory on this platform, pass --config");
            return ExitCode::FAILURE;
        };
        return match config.save_to(&path) {
            Ok(()) => {
                println!("Wrote {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    if args.list {
        let cameras = CameraCapture::list_cameras();
        if cameras.is_empty() {
            println!("No cameras found");
        }
        for camera in cameras {
            println!("{}: {}", camera.index, camera.name);
        }
        return ExitCode::SUCCESS;
    }

    tracing::info!(model = config.model.name(), camera = config.camera.index, "Starting");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            tracing::error!("Failed to create event loop: {}", e);
            return ExitCode::FAILURE;
        }
    };
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = PeepDetectionApp::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        tracing::error!("Event loop error: {}", e);
        return ExitCode::FAILURE;
    }

    if app.failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
