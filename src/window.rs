use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    platform::run_return::EventLoopExtRunReturn,
    window::{Window, WindowBuilder},
};

use crate::error::Result;

pub const WINDOW_TITLE: &str = "Sphere Tracer";

/// The application window. Events are polled explicitly, once per render loop iteration.
// Rust will drop these fields in the order they are declared
pub struct RenderWindow {
    pub window: Window,
    event_loop: Option<EventLoop<()>>,
    size: PhysicalSize<u32>,
    close_requested: bool,
}

impl RenderWindow {
    /// The window is not resizable, only minimizing it changes its size.
    pub fn new(event_loop: EventLoop<()>, width: u32, height: u32) -> Result<Self> {
        let window = WindowBuilder::new()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize { width, height })
            .with_resizable(false)
            .build(&event_loop)?;
        let size = window.inner_size();

        Ok(Self {
            window,
            event_loop: Some(event_loop),
            size,
            close_requested: false,
        })
    }

    /// Processes every pending window event and returns.
    pub fn poll_events(&mut self) {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return;
        };

        let size = &mut self.size;
        let close_requested = &mut self.close_requested;
        event_loop.run_return(|event, _, control_flow| {
            control_flow.set_poll();

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => *close_requested = true,
                    WindowEvent::Resized(new_size) => *size = new_size,
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(VirtualKeyCode::Escape),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => *close_requested = true,
                    _ => {}
                },
                Event::MainEventsCleared => control_flow.set_exit(),
                _ => {}
            }
        });
    }

    /// Size as last reported by the windowing system. Minimized windows report zero.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Hands the event loop back, so that another window can be created later on.
    pub fn take_event_loop(&mut self) -> Option<EventLoop<()>> {
        self.event_loop.take()
    }
}
