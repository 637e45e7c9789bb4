//! Host-facing core (spec.md §5 "Scheduling model", §6 "External
//! interfaces"): owns every shared resource, spawns the dispatcher and
//! render-worker threads, and exposes the memory-mapped
//! `write_byte/word/long` / `read_byte/word/long` surface plus the
//! blocking `swap_buffer` call a host uses to drive the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::barrier::RenderBarrier;
use crate::core::config::DeviceConfig;
use crate::core::counters::PixelCounters;
use crate::core::dispatcher::{DeviceShared, Dispatcher};
use crate::core::display::{DisplayEngine, DisplayGeometry};
use crate::core::error::CoreResult;
use crate::core::fifo::{CommandFifo, FifoEntry, WriteKind};
use crate::core::memory::{FramebufferMemory, TextureMemory};
use crate::core::param_ring::ParameterRing;
use crate::core::pixel::tables::{ClutTable, Tables};
use crate::core::raster::DirtyLines;
use crate::core::registers;
use crate::core::swap::SwapController;
use crate::core::workers;

/// Register-window / framebuffer-window / texture-window boundaries
/// relative to the base of the mapping (spec.md §4.10).
const REGISTER_WINDOW_END: u32 = 0x400000;
const FRAMEBUFFER_WINDOW_END: u32 = 0x800000;
const TEXTURE_WINDOW_END: u32 = 0x1000000;

/// The complete device: shared state plus the threads that animate it.
/// Built from a validated [`DeviceConfig`], torn down cleanly on `Drop`
/// (spec.md §5 "Close-time shutdown must kill the dispatcher and
/// workers cleanly").
pub struct Core {
    shared: Arc<DeviceShared>,
    dispatcher_stop: Arc<AtomicBool>,
    dispatcher_thread: Option<std::thread::JoinHandle<()>>,
    worker_stop: Arc<AtomicBool>,
    worker_threads: Vec<std::thread::JoinHandle<()>>,
    display: Mutex<DisplayEngine>,
    config: DeviceConfig,
}

impl Core {
    pub fn new(config: DeviceConfig) -> CoreResult<Self> {
        config.validate()?;

        let shared = Arc::new(DeviceShared {
            fifo: CommandFifo::new(config.fifo_capacity),
            ring: ParameterRing::new(config.param_ring_capacity, config.worker_count as usize),
            barrier: RenderBarrier::new(),
            fb: FramebufferMemory::new(config.framebuffer_bytes),
            tex: TextureMemory::new(config.texture_bytes),
            tables: Tables::build(),
            counters: PixelCounters::default(),
            dirty: DirtyLines::new(DisplayGeometry::default().height as usize),
            swap: SwapController::new(),
            clut: Mutex::new(ClutTable::default()),
            fb_width: DisplayGeometry::default().width as usize,
            fb_height: DisplayGeometry::default().height as usize,
            worker_count: config.worker_count as u32,
        });

        let dispatcher_stop = Arc::new(AtomicBool::new(false));
        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher_stop_flag = Arc::clone(&dispatcher_stop);
        let dispatcher_thread = std::thread::Builder::new()
            .name("fifo-dispatcher".into())
            .spawn(move || {
                let mut dispatcher = Dispatcher::new(dispatcher_shared);
                while !dispatcher_stop_flag.load(Ordering::Acquire) {
                    if !dispatcher.run_once() {
                        std::thread::sleep(std::time::Duration::from_micros(100));
                    }
                }
            })
            .expect("failed to spawn dispatcher thread");

        let (worker_threads, worker_stop) = workers::spawn_workers(Arc::clone(&shared));

        Ok(Self {
            shared,
            dispatcher_stop,
            dispatcher_thread: Some(dispatcher_thread),
            worker_stop,
            worker_threads,
            display: Mutex::new(DisplayEngine::new(DisplayGeometry::default())),
            config,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Push one command onto the FIFO, blocking (spinning) while it is
    /// full rather than dropping the write (spec.md §5, §7).
    fn enqueue(&self, kind: WriteKind, address: u32, value: u32) {
        while self.shared.fifo.is_full() {
            std::thread::yield_now();
        }
        self.shared.fifo.push(FifoEntry { kind, address, value });
    }

    fn classify(address: u32) -> (WriteKind, u32) {
        if address < REGISTER_WINDOW_END {
            (WriteKind::Register, address)
        } else if address < FRAMEBUFFER_WINDOW_END {
            (WriteKind::FramebufferWord, address - REGISTER_WINDOW_END)
        } else {
            (WriteKind::TextureLong, (address - FRAMEBUFFER_WINDOW_END) & (TEXTURE_WINDOW_END - FRAMEBUFFER_WINDOW_END - 1))
        }
    }

    pub fn write_byte(&self, address: u32, value: u8) {
        self.write_long(address, value as u32);
    }

    pub fn write_word(&self, address: u32, value: u16) {
        let (kind, local) = Self::classify(address);
        self.enqueue(kind, local, value as u32);
    }

    pub fn write_long(&self, address: u32, value: u32) {
        let (kind, local) = Self::classify(address);
        let kind = if kind == WriteKind::FramebufferWord { WriteKind::FramebufferLong } else { kind };
        self.enqueue(kind, local, value);
    }

    /// Reads observe every previously enqueued command by first draining
    /// the FIFO and the render barrier (spec.md §5 "Host may block in
    /// `read_fb`/`read_reg_status`").
    fn sync_before_read(&self) {
        while !self.shared.fifo.is_empty() {
            std::thread::yield_now();
        }
        self.shared.barrier.wait_until_drained(&self.shared.ring);
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        self.read_long(address) as u8
    }

    pub fn read_word(&self, address: u32) -> u16 {
        self.read_long(address) as u16
    }

    pub fn read_long(&self, address: u32) -> u32 {
        if address == registers::STATUS {
            return self.read_status();
        }
        self.sync_before_read();
        if address < REGISTER_WINDOW_END {
            self.read_register(address)
        } else if address < FRAMEBUFFER_WINDOW_END {
            let offset = self.shared.fb.current_front_offset() + (address - REGISTER_WINDOW_END) as usize;
            self.shared.fb.mem.read_u32(offset)
        } else {
            let offset = (address - FRAMEBUFFER_WINDOW_END) as usize;
            self.shared.tex.mem.read_u32(offset)
        }
    }

    fn read_register(&self, address: u32) -> u32 {
        match address {
            registers::FBI_PIXELS_IN => self.shared.counters.snapshot()[0],
            registers::FBI_CHROMA_FAIL => self.shared.counters.snapshot()[1],
            registers::FBI_ZFUNC_FAIL => self.shared.counters.snapshot()[2],
            registers::FBI_AFUNC_FAIL => self.shared.counters.snapshot()[3],
            registers::FBI_PIXELS_OUT => self.shared.counters.snapshot()[4],
            _ => 0,
        }
    }

    /// `status` register read (spec.md §6): FIFO free-entry count in the
    /// low bits, swap count and a busy flag above it, vsync/vblank in the
    /// top bit.
    fn read_status(&self) -> u32 {
        let fifo_free = (self.shared.fifo.capacity() - self.shared.fifo.len()) as u32 & 0xffff;
        let swap_count = self.shared.swap.swap_count() & 0x3f;
        let busy = if !self.shared.ring.drained() || !self.shared.fifo.is_empty() { 1 } else { 0 };
        let vblank = if self.display.lock().unwrap().in_vblank() { 1 } else { 0 };
        fifo_free | (swap_count << 16) | (busy << 22) | (vblank << 31)
    }

    /// Advance the display engine by one scanline (spec.md §4.9, §5
    /// "Display timer: periodic callback on host thread"). A host
    /// driving the device must call this on its own clock; nothing in
    /// the core paces it internally.
    pub fn tick_display(&self) {
        let clut = self.shared.clut.lock().unwrap();
        self.display.lock().unwrap().tick(&self.shared.fb, &self.shared.dirty, &clut, &self.shared.swap, self.shared.fb_width);
    }

    pub fn output_frame(&self) -> Vec<[u8; 4]> {
        self.display.lock().unwrap().output_frame().to_vec()
    }

    pub fn display_geometry(&self) -> DisplayGeometry {
        self.display.lock().unwrap().geometry()
    }

    pub fn set_screen_filter_enabled(&self, enabled: bool) {
        self.display.lock().unwrap().screen_filter_enabled = enabled;
    }

    /// Request a buffer swap and block until it has been committed, or
    /// until the FIFO fills up enough to need drain priority (spec.md
    /// §4.9 "A producer waiting on a sync swap may be released early if
    /// the FIFO has filled"). `interval` is the vsync wait count; `0` is
    /// an immediate sync swap.
    pub fn swap_buffer(&self, interval: u32) {
        let before = self.shared.swap.swap_count();
        self.write_long(registers::SWAPBUFFER_CMD, (interval & 0xff) << 1);
        loop {
            if self.shared.fifo.is_full() {
                return;
            }
            self.sync_before_read();
            if interval == 0 {
                return;
            }
            if self.shared.swap.swap_count() <= before {
                return;
            }
            self.tick_display();
        }
    }

    /// Dump texture RAM to disk as a development aid (spec.md §6
    /// "Persisted state"). Not required for correct operation; errors
    /// are logged and otherwise ignored rather than propagated.
    pub fn dump_texture_memory(&self, path: &str) {
        let width = 1024usize;
        let bytes = self.shared.tex.mem.as_bytes();
        let height = (bytes.len() / 2).div_ceil(width).max(1);
        let mut image = image::RgbaImage::new(width as u32, height as u32);
        for (i, px) in image.pixels_mut().enumerate() {
            let addr = i * 2;
            if addr + 1 >= bytes.len() {
                break;
            }
            let raw = u16::from_le_bytes([bytes[addr], bytes[addr + 1]]);
            let rgba = crate::core::pixel::formats::decode_16bit_direct(crate::core::pixel::formats::TexelFormat::R5g6b5, raw);
            *px = image::Rgba(rgba);
        }
        if let Err(err) = image.save(path) {
            tracing::warn!(path, %err, "failed to dump texture memory");
        }
    }

    pub fn shutdown(&mut self) {
        self.dispatcher_stop.store(true, Ordering::Release);
        self.worker_stop.store(true, Ordering::Release);
        if let Some(handle) = self.dispatcher_thread.take() {
            let _ = handle.join();
        }
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_and_shutdown_cleanly() {
        let core = Core::new(DeviceConfig::default()).unwrap();
        drop(core);
    }

    #[test]
    fn register_roundtrip_through_fifo() {
        let core = Core::new(DeviceConfig::default()).unwrap();
        core.write_long(registers::START_R, 42);
        core.write_long(registers::NOP_CMD, 0);
        core.sync_before_read();
        assert_eq!(core.read_register(registers::FBI_PIXELS_IN), 0);
    }

    #[test]
    fn status_read_reports_fifo_headroom() {
        let core = Core::new(DeviceConfig::default()).unwrap();
        let status = core.read_long(registers::STATUS);
        assert_eq!(status & 0xffff, core.config.fifo_capacity as u32 & 0xffff);
    }

    #[test]
    fn immediate_swap_buffer_returns() {
        let core = Core::new(DeviceConfig::default()).unwrap();
        core.swap_buffer(0);
    }
}
