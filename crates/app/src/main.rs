//! Application entry point.
//!
//! Owns the winit event loop and drives one frame per `RedrawRequested`.
//! On close the renderer drains outstanding GPU work before teardown; any
//! frame error is logged and turns into a non-zero exit code.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use glint_platform::{build_window, WindowConfig};
use glint_renderer::{FrameLoop, Renderer, RendererConfig};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

struct App {
    window: Option<Window>,
    frame_loop: Option<FrameLoop<Renderer>>,
    closing: Arc<AtomicBool>,
    failed: bool,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            frame_loop: None,
            closing: Arc::new(AtomicBool::new(false)),
            failed: false,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = build_window(event_loop, &WindowConfig::default())
            .context("window creation failed")?;

        let renderer = Renderer::new(&window, self.closing.clone(), &RendererConfig::default())
            .context("renderer bootstrap failed")?;

        self.frame_loop = Some(FrameLoop::new(renderer));
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failed = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.closing.store(true, Ordering::Relaxed);

                if let Some(frame_loop) = self.frame_loop.as_mut() {
                    if let Err(err) = frame_loop.drain() {
                        error!("shutdown drain failed: {err}");
                        self.failed = true;
                    } else {
                        info!("shut down after {} frame(s)", frame_loop.frame_number());
                    }
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if self.closing.load(Ordering::Relaxed) {
                    return;
                }

                if let Some(frame_loop) = self.frame_loop.as_mut() {
                    if let Err(err) = frame_loop.run_frame() {
                        self.fail(event_loop, anyhow::Error::new(err).context("frame failed"));
                        return;
                    }
                }

                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let event_loop = EventLoop::new().context("event loop creation failed")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app).context("event loop failed")?;

    Ok(!app.failed)
}

fn main() -> ExitCode {
    glint_core::init_logging();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
