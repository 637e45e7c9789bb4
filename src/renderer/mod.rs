pub mod pixels;

use std::sync::{mpsc, Arc};

/// Events the core-driving thread posts to the windowing thread.
#[derive(Debug, Clone)]
pub enum GPUEvent {
    NewFrame(FrameBuffer),
}

/// Events the windowing thread posts back to the core-driving thread.
#[derive(Debug, Clone)]
pub enum GUIEvent {
    ToggleScreenFilter,
    Closed,
}

/// One scanned-out RGBA8 frame (spec.md §4.9 "output scanline buffer").
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frame: Arc<Vec<u8>>,
    width: usize,
    height: usize,
}

impl FrameBuffer {
    pub fn new(frame: Arc<Vec<u8>>, width: usize, height: usize) -> Self {
        Self { frame, width, height }
    }
}

pub type CoreDriver = fn(GPUPixelsRenderer, mpsc::Receiver<GUIEvent>);

pub trait Renderer {
    fn render_frame(&mut self, frame: FrameBuffer);
}

pub use pixels::{run_loop, GPUPixelsRenderer};
