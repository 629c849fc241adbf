//! Application state holding the wgpu graphics context
//!
//! Owns the window surface, the egui integration, the camera stream and the
//! frame loop. Each redraw pulls the latest camera frame, runs one
//! detection/overlay iteration into the raster canvas, uploads the canvas as
//! an egui texture and draws the UI around it.

use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::CameraCapture;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::ml::create_detector;
use crate::pipeline::{start_pipeline, FrameLoop, FrameRate, FrameReport, FrameSettings};
use crate::render::{OverlayTarget, PrivacyOverlay, PrivacyStyle, RasterCanvas};
use crate::subject::ModelKind;

pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    // Camera and detection
    camera: Option<CameraCapture>,
    frame_loop: Option<FrameLoop>,
    /// Shown instead of the video when startup failed
    startup_error: Option<String>,
    model: ModelKind,
    last_camera_frame: Option<u64>,

    // Per-frame state
    settings: FrameSettings,
    report: FrameReport,
    canvas: RasterCanvas,
    canvas_texture: Option<egui::TextureHandle>,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    /// Rate of frames going through detection, not UI redraws
    frame_rate: FrameRate,
}

impl App {
    /// Create the graphics context, then open the camera and load the model.
    ///
    /// Graphics failures are returned. Camera and model failures are kept
    /// and shown in the window.
    pub async fn new(window: Arc<Window>, app_config: &AppConfig) -> Result<Self, AppError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| AppError::Graphics(format!("Failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| AppError::Graphics("Failed to find suitable GPU adapter".to_string()))?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Peep Detection Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| AppError::Graphics(format!("Failed to create device: {}", e)))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| AppError::Graphics("Surface has no supported formats".to_string()))?;

        tracing::info!("Surface format: {:?}", surface_format);

        let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            camera: None,
            frame_loop: None,
            startup_error: None,
            model: app_config.model,
            last_camera_frame: None,
            settings: app_config.frame_settings(),
            report: FrameReport::default(),
            canvas: RasterCanvas::new(app_config.camera.width, app_config.camera.height),
            canvas_texture: None,
            egui_ctx,
            egui_state,
            egui_renderer,
            frame_rate: FrameRate::default(),
        };

        if let Err(e) = app.start(app_config) {
            tracing::error!("Startup failed: {}", e);
            app.startup_error = Some(e.to_string());
        }

        Ok(app)
    }

    /// Open the camera, then load the model. Nothing runs if either fails.
    fn start(&mut self, app_config: &AppConfig) -> Result<(), AppError> {
        let camera_config = &app_config.camera;
        let overlay = PrivacyOverlay::load(app_config.privacy.sprite_path.as_deref());
        let (camera, frame_loop) = start_pipeline(
            || CameraCapture::open(camera_config.index, camera_config.width, camera_config.height),
            || create_detector(app_config.model, &app_config.models),
            overlay,
        )?;

        let (width, height) = camera.resolution();
        tracing::info!("Camera '{}' streaming at {}x{}", camera.name(), width, height);

        self.canvas.resize(width, height);
        self.camera = Some(camera);
        self.frame_loop = Some(frame_loop);
        Ok(())
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn toggle_privacy(&mut self) {
        self.settings.privacy_enabled = !self.settings.privacy_enabled;
        tracing::info!("Privacy filter: {}", self.settings.privacy_enabled);
    }

    /// Select an overlay style by index
    pub fn select_style(&mut self, index: usize) {
        if let Some(style) = PrivacyStyle::ALL.get(index) {
            self.settings.style = *style;
            tracing::info!("Overlay style: {}", style.display_name());
        }
    }

    /// Run one frame loop iteration when the camera has a new frame
    pub fn update(&mut self) {
        let (Some(camera), Some(frame_loop)) = (&self.camera, &mut self.frame_loop) else {
            return;
        };
        let Some(frame) = camera.latest_frame() else {
            return;
        };
        if self.last_camera_frame == Some(frame.frame_number) {
            return;
        }
        self.last_camera_frame = Some(frame.frame_number);

        self.canvas.resize(frame.image.width(), frame.image.height());
        self.report = frame_loop.tick(&frame.image, &self.settings, &mut self.canvas);
        self.frame_rate.record(frame.timestamp);

        let image = self.canvas.image();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(
            [image.width() as usize, image.height() as usize],
            image.as_raw(),
        );
        match &mut self.canvas_texture {
            Some(texture) => texture.set(color_image, egui::TextureOptions::LINEAR),
            None => {
                self.canvas_texture = Some(self.egui_ctx.load_texture(
                    "canvas",
                    color_image,
                    egui::TextureOptions::LINEAR,
                ));
            }
        }
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot state so the UI closure doesn't borrow self
        let fps = self.frame_rate.fps();
        let summary = self.report.summary();
        let detection_error = self.report.error.clone();
        let model = self.model;
        let startup_error = self.startup_error.clone();
        let texture = self.canvas_texture.clone();
        let camera_label = self.camera.as_ref().map(|c| {
            let (w, h) = c.resolution();
            format!("{} ({}x{}), {} frames", c.name(), w, h, c.frame_count())
        });
        let mut settings = self.settings;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Peep Detection");
                    ui.separator();
                    ui.label(format!("FPS: {:.1}", fps));
                    ui.separator();
                    ui.label(format!("{}: {}", model.display_name(), summary));
                });
            });

            egui::SidePanel::left("controls").show(ctx, |ui| {
                ui.heading("Privacy");
                ui.separator();
                ui.checkbox(&mut settings.privacy_enabled, "Privacy filter (P)");

                ui.add_enabled_ui(settings.privacy_enabled, |ui| {
                    ui.label("Style:");
                    for (i, style) in PrivacyStyle::ALL.iter().enumerate() {
                        ui.radio_value(
                            &mut settings.style,
                            *style,
                            format!("{}. {}", i + 1, style.display_name()),
                        );
                    }

                    ui.add_space(4.0);
                    ui.label("Applies to:");
                    for target in [OverlayTarget::Others, OverlayTarget::All] {
                        ui.radio_value(&mut settings.target, target, target.display_name());
                    }
                });

                ui.separator();
                ui.heading("Source");
                ui.separator();
                ui.label(format!("Model: {}", model.name()));
                match &camera_label {
                    Some(label) => ui.label(label),
                    None => ui.label("No camera"),
                };
                if let Some(e) = &detection_error {
                    ui.colored_label(egui::Color32::YELLOW, format!("Detection error: {}", e));
                }

                ui.separator();
                ui.small("P: privacy  1-3: style  F11: fullscreen  Esc: quit");
            });

            egui::CentralPanel::default().show(ctx, |ui| {
                if let Some(error) = &startup_error {
                    ui.centered_and_justified(|ui| {
                        ui.colored_label(egui::Color32::LIGHT_RED, error);
                    });
                } else if let Some(texture) = &texture {
                    ui.centered_and_justified(|ui| {
                        ui.add(
                            egui::Image::new(texture)
                                .maintain_aspect_ratio(true)
                                .shrink_to_fit(),
                        );
                    });
                } else {
                    ui.centered_and_justified(|ui| {
                        ui.label("Waiting for camera...");
                    });
                }
            });
        });

        if settings != self.settings {
            self.settings = settings;
            tracing::debug!(?settings, "Frame settings changed");
        }

        self.egui_state.handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self.egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer.render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}
