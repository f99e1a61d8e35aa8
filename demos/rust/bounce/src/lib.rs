//! A square bouncing around a 512x512 viewport.
//!
//! Arrow keys push the square, Escape stops the animation.
//!
//! Build with `cargo build --release --target wasm32-unknown-unknown`.

#![no_std]

use core::fmt::{self, Write};
use core::panic::PanicInfo;
use core::ptr::addr_of_mut;

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}

#[link(wasm_import_module = "env")]
extern "C" {
    fn puts(ptr: *const u8, len: usize);
    fn now() -> f64;
    fn event_loop_new() -> u32;
    fn event_loop_raf(id: u32) -> u32;
    fn svg_set_path(ptr: *const u8, len: usize);
    fn fill_rand(ptr: *mut u8, len: usize) -> u32;
}

const VIEWPORT: i32 = 512;
const SIDE: i32 = 24;

const EVENT_FRAME: u32 = 0;
const EVENT_KEY_DOWN: u32 = 1;

const KEY_ESCAPE: u32 = 27;
const KEY_LEFT: u32 = 37;
const KEY_UP: u32 = 38;
const KEY_RIGHT: u32 = 39;
const KEY_DOWN: u32 = 40;

struct Square {
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
    frames: u32,
    started_at: f64,
    running: bool,
}

static mut SQUARE: Square = Square {
    x: 0,
    y: 0,
    dx: 3,
    dy: 2,
    frames: 0,
    started_at: 0.0,
    running: true,
};

fn square() -> &'static mut Square {
    // Single-threaded guest: the host never re-enters a callback
    unsafe { &mut *addr_of_mut!(SQUARE) }
}

/// Fixed-capacity text buffer for `core::fmt`.
struct TextBuf<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> TextBuf<N> {
    const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    fn as_str(&self) -> &str {
        // Only whole `&str`s are ever copied in
        unsafe { core::str::from_utf8_unchecked(&self.bytes[..self.len]) }
    }
}

impl<const N: usize> Write for TextBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > N {
            return Err(fmt::Error);
        }
        self.bytes[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

fn print(text: &str) {
    unsafe { puts(text.as_ptr(), text.len()) }
}

impl Square {
    fn step(&mut self) {
        self.x += self.dx;
        self.y += self.dy;

        if self.x < 0 || self.x > VIEWPORT - SIDE {
            self.dx = -self.dx;
            self.x = self.x.clamp(0, VIEWPORT - SIDE);
        }
        if self.y < 0 || self.y > VIEWPORT - SIDE {
            self.dy = -self.dy;
            self.y = self.y.clamp(0, VIEWPORT - SIDE);
        }
        self.frames += 1;
    }

    fn render(&self) {
        let mut path = TextBuf::<96>::new();
        let drawn = write!(
            path,
            "M {} {} h {SIDE} v {SIDE} h -{SIDE} Z",
            self.x, self.y
        );
        if drawn.is_ok() {
            unsafe { svg_set_path(path.as_ptr(), path.len) };
        }
    }

    fn key_down(&mut self, code: u32) {
        match code {
            KEY_LEFT => self.dx -= 1,
            KEY_RIGHT => self.dx += 1,
            KEY_UP => self.dy -= 1,
            KEY_DOWN => self.dy += 1,
            KEY_ESCAPE => {
                self.running = false;
                print("stopped");
            }
            _ => {}
        }
    }

    fn report(&self) {
        let elapsed = unsafe { now() } - self.started_at;
        let mut line = TextBuf::<64>::new();
        if write!(line, "frame {} at {:.1}ms", self.frames, elapsed).is_ok() {
            print(line.as_str());
        }
    }
}

#[no_mangle]
pub extern "C" fn my_main() {
    let square = square();

    let mut seed = [0u8; 2];
    if unsafe { fill_rand(seed.as_mut_ptr(), seed.len()) } == 0 {
        square.x = i32::from(seed[0]) * (VIEWPORT - SIDE) / 255;
        square.y = i32::from(seed[1]) * (VIEWPORT - SIDE) / 255;
    }
    square.started_at = unsafe { now() };

    let id = unsafe { event_loop_new() };
    unsafe { event_loop_raf(id) };
    print("bounce started");
}

#[no_mangle]
pub extern "C" fn event_loop_cb(id: u32, kind: u32, code: u32, _chr: u32, _flags: u32) {
    let square = square();

    match kind {
        EVENT_FRAME => {
            square.step();
            square.render();
            if square.frames % 60 == 0 {
                square.report();
            }
            if square.running {
                unsafe { event_loop_raf(id) };
            }
        }
        EVENT_KEY_DOWN => square.key_down(code),
        _ => {}
    }
}

static mut HEAP: [u8; 4096] = [0; 4096];
static mut HEAP_TOP: usize = 0;

/// Bump allocator for strings the host writes into guest memory.
#[no_mangle]
pub extern "C" fn alloc(len: usize) -> *mut u8 {
    unsafe {
        let top = *addr_of_mut!(HEAP_TOP);
        let heap = &mut *addr_of_mut!(HEAP);
        if top + len > heap.len() {
            return core::ptr::null_mut();
        }
        *addr_of_mut!(HEAP_TOP) = top + len;
        heap.as_mut_ptr().add(top)
    }
}
