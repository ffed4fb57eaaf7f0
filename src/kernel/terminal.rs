//! Terminal multiplexer
//!
//! Three virtual consoles share one physical text screen. Each terminal
//! owns a line-input buffer, a cursor, and a cached video frame used while
//! it is not the one displayed. Every screen write goes through the paging
//! video window, so a background terminal's output lands in its cache and
//! the foreground terminal's output lands on real VGA memory - the
//! scheduler reconciles the window on every tick.
//!
//! `switch_to` is the delicate part: the physical frame may only be read
//! or written while the window actually maps it, so the copy/remap order
//! differs depending on whether the outgoing and incoming terminals match
//! the terminal the scheduler currently favors.

use super::paging::{PAGE_4K, Paging, VIDEO_CACHE_BASE, VIDEO_PHYS};
use super::platform::{Platform, PortBus};
use super::process::{Pid, TerminalId};

pub const NUM_TERMINALS: usize = 3;
pub const LINE_BUFFER: usize = 128;

pub const COLS: usize = 80;
pub const ROWS: usize = 25;
pub const CELLS: usize = COLS * ROWS;

/// Black-on-grey text attribute.
pub const ATTR: u8 = 0x07;
const BLANK: u16 = (' ' as u16) | ((ATTR as u16) << 8);

/// VGA CRT controller ports for the hardware cursor.
pub const VGA_INDEX_REGISTER: u16 = 0x3D4;
pub const VGA_DATA_REGISTER: u16 = 0x3D5;
const CURSOR_HIGH_BYTE: u8 = 0x0E;
const CURSOR_LOW_BYTE: u8 = 0x0F;

/// A physical video frame the window can target: the live VGA frame or one
/// terminal's cache. Invalid frames are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrame {
    Live,
    Cache(usize),
}

impl VideoFrame {
    /// Physical base address of this frame.
    pub fn phys(self) -> u32 {
        match self {
            VideoFrame::Live => VIDEO_PHYS,
            VideoFrame::Cache(t) => VIDEO_CACHE_BASE + t as u32 * PAGE_4K,
        }
    }

    /// Reverse of `phys`, for resolving the paging window target.
    pub fn from_phys(phys: u32) -> Option<VideoFrame> {
        if phys == VIDEO_PHYS {
            return Some(VideoFrame::Live);
        }
        let t = phys.checked_sub(VIDEO_CACHE_BASE)? / PAGE_4K;
        ((t as usize) < NUM_TERMINALS && phys % PAGE_4K == 0)
            .then_some(VideoFrame::Cache(t as usize))
    }
}

/// The physical frames: one live VGA frame plus one cache per terminal.
pub struct VideoMem {
    live: Box<[u16; CELLS]>,
    cache: Vec<Box<[u16; CELLS]>>,
}

impl VideoMem {
    pub fn new() -> Self {
        Self {
            live: Box::new([BLANK; CELLS]),
            cache: (0..NUM_TERMINALS).map(|_| Box::new([BLANK; CELLS])).collect(),
        }
    }

    pub fn frame(&self, frame: VideoFrame) -> &[u16; CELLS] {
        match frame {
            VideoFrame::Live => &self.live,
            VideoFrame::Cache(t) => &self.cache[t],
        }
    }

    pub fn frame_mut(&mut self, frame: VideoFrame) -> &mut [u16; CELLS] {
        match frame {
            VideoFrame::Live => &mut self.live,
            VideoFrame::Cache(t) => &mut self.cache[t],
        }
    }

    /// Raw bytes of a frame, for whole-frame comparisons.
    pub fn frame_bytes(&self, frame: VideoFrame) -> &[u8] {
        bytemuck::cast_slice(self.frame(frame))
    }

    /// Copy one whole frame over another.
    pub fn copy_frame(&mut self, from: VideoFrame, to: VideoFrame) {
        if from == to {
            return;
        }
        let src = *self.frame(from);
        *self.frame_mut(to) = src;
    }

    /// Blank a frame.
    pub fn clear(&mut self, frame: VideoFrame) {
        self.frame_mut(frame).fill(BLANK);
    }
}

impl Default for VideoMem {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalError {
    /// Empty or missing buffer.
    InvalidBuffer,
}

impl std::fmt::Display for TerminalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalError::InvalidBuffer => write!(f, "invalid buffer"),
        }
    }
}

/// One virtual console.
#[derive(Debug)]
pub struct Terminal {
    pub id: TerminalId,
    /// Process currently considered active on this terminal.
    pub pid: Option<Pid>,
    buffer: [u8; LINE_BUFFER],
    /// Write cursor into the line buffer.
    write_pos: usize,
    /// Length of the completed line once `line_ready` is set.
    line_len: usize,
    line_ready: bool,
    pub cursor_x: usize,
    pub cursor_y: usize,
    /// Backing frame used while this terminal is not displayed.
    pub cache: VideoFrame,
    /// Whether a shell has ever been spawned here.
    pub active: bool,
}

impl Terminal {
    fn new(id: usize) -> Self {
        Self {
            id: TerminalId(id),
            pid: None,
            buffer: [0; LINE_BUFFER],
            write_pos: 0,
            line_len: 0,
            line_ready: false,
            cursor_x: 0,
            cursor_y: 0,
            cache: VideoFrame::Cache(id),
            active: false,
        }
    }
}

/// All terminals plus the identity of the one physically displayed.
pub struct TerminalMux {
    terminals: Vec<Terminal>,
    pub displayed: usize,
}

impl TerminalMux {
    /// Zeroed terminals, each with its own cache frame, terminal 0
    /// displayed. Clears the screen and homes the hardware cursor.
    pub fn new(video: &mut VideoMem, bus: &mut dyn PortBus) -> Self {
        let mux = Self {
            terminals: (0..NUM_TERMINALS).map(Terminal::new).collect(),
            displayed: 0,
        };
        video.clear(VideoFrame::Live);
        for t in 0..NUM_TERMINALS {
            video.clear(VideoFrame::Cache(t));
        }
        update_cursor(bus, 0, 0);
        mux
    }

    pub fn get(&self, t: usize) -> &Terminal {
        &self.terminals[t]
    }

    pub fn get_mut(&mut self, t: usize) -> &mut Terminal {
        &mut self.terminals[t]
    }

    /// Whether a completed line is waiting on terminal `t`.
    pub fn line_ready(&self, t: usize) -> bool {
        self.terminals[t].line_ready
    }

    /// Append one byte of keyboard input to `t`'s line buffer.
    ///
    /// Newline/carriage-return complete the line (they are not stored);
    /// backspace retracts one byte and is a no-op on an empty buffer; NUL
    /// is ignored; anything else is stored if space remains and silently
    /// dropped otherwise.
    pub fn putc_to_buffer(&mut self, t: usize, byte: u8) {
        let term = &mut self.terminals[t];
        match byte {
            0 => {}
            b'\n' | b'\r' => {
                term.line_len = term.write_pos;
                term.write_pos = 0;
                term.line_ready = true;
            }
            0x08 => {
                if term.write_pos > 0 {
                    term.write_pos -= 1;
                    term.buffer[term.write_pos] = 0;
                }
            }
            _ => {
                if term.write_pos < LINE_BUFFER - 1 {
                    term.buffer[term.write_pos] = byte;
                    term.write_pos += 1;
                }
            }
        }
    }

    /// Block until a line is ready on `t`, then copy it out and reset the
    /// buffer. The one operation in the core that suspends its caller; the
    /// wait spins on the platform idle hook until the keyboard handler
    /// completes a line.
    pub fn read_line(&mut self, t: usize, buf: &mut [u8], platform: &mut dyn Platform) -> usize {
        while !self.terminals[t].line_ready {
            platform.idle();
        }
        let term = &mut self.terminals[t];
        let n = term.line_len.min(buf.len()).min(LINE_BUFFER);
        buf[..n].copy_from_slice(&term.buffer[..n]);
        term.buffer = [0; LINE_BUFFER];
        term.write_pos = 0;
        term.line_len = 0;
        term.line_ready = false;
        n
    }

    /// Write `buf` to the screen on behalf of terminal `t`, through the
    /// current video-window mapping. Non-NUL bytes only; scrolls when
    /// output passes the last row. Returns the byte count processed.
    pub fn write(
        &mut self,
        t: usize,
        buf: &[u8],
        paging: &Paging,
        video: &mut VideoMem,
        bus: &mut dyn PortBus,
    ) -> Result<usize, TerminalError> {
        if buf.is_empty() {
            return Err(TerminalError::InvalidBuffer);
        }
        let frame = VideoFrame::from_phys(paging.video_window()).unwrap_or(VideoFrame::Live);
        for &byte in buf {
            if byte != 0 {
                self.put_char(t, byte, video.frame_mut(frame));
            }
        }
        if t == self.displayed {
            let term = &self.terminals[t];
            update_cursor(bus, term.cursor_x, term.cursor_y);
        }
        Ok(buf.len())
    }

    fn put_char(&mut self, t: usize, byte: u8, frame: &mut [u16; CELLS]) {
        let term = &mut self.terminals[t];
        match byte {
            b'\n' | b'\r' => {
                term.cursor_x = 0;
                term.cursor_y += 1;
            }
            0x08 => {
                if term.cursor_x > 0 {
                    term.cursor_x -= 1;
                    frame[term.cursor_y * COLS + term.cursor_x] = BLANK;
                }
            }
            _ => {
                frame[term.cursor_y * COLS + term.cursor_x] =
                    (byte as u16) | ((ATTR as u16) << 8);
                term.cursor_x += 1;
                if term.cursor_x == COLS {
                    term.cursor_x = 0;
                    term.cursor_y += 1;
                }
            }
        }
        if term.cursor_y == ROWS {
            scroll(frame);
            term.cursor_x = 0;
            term.cursor_y = ROWS - 1;
        }
    }

    /// Switch the physically displayed terminal to `target`.
    ///
    /// No-op for out-of-range targets or when `target` is already
    /// displayed. Otherwise the live frame is captured into the outgoing
    /// terminal's cache and the target's cache restored onto it, with the
    /// window remapped so the physical frame is only touched while it is
    /// mapped, and left pointing wherever the scheduler (favoring
    /// `scheduled`) expects it. Callers hold the interrupt mask.
    pub fn switch_to(
        &mut self,
        target: usize,
        scheduled: usize,
        paging: &mut Paging,
        video: &mut VideoMem,
        bus: &mut dyn PortBus,
    ) {
        if target >= NUM_TERMINALS || target == self.displayed {
            return;
        }
        let outgoing = self.displayed;
        let out_cache = self.terminals[outgoing].cache;
        let in_cache = self.terminals[target].cache;

        if scheduled == outgoing && target != scheduled {
            // Displayed == scheduled: the window already maps real video
            // memory, so copy first, then retarget it at the scheduled
            // terminal's cache (it is about to run in the background).
            video.copy_frame(VideoFrame::Live, out_cache);
            video.copy_frame(in_cache, VideoFrame::Live);
            paging.remap_video_window(VideoFrame::Cache(scheduled).phys());
        } else if target == scheduled {
            // Incoming terminal is the scheduled one: map real video memory
            // before copying; it stays live afterwards.
            paging.remap_video_window(VideoFrame::Live.phys());
            video.copy_frame(VideoFrame::Live, out_cache);
            video.copy_frame(in_cache, VideoFrame::Live);
        } else {
            // Neither end is scheduled: map real video memory for the
            // copies, then hand the window back to the scheduled terminal's
            // cache before interrupts come back.
            paging.remap_video_window(VideoFrame::Live.phys());
            video.copy_frame(VideoFrame::Live, out_cache);
            video.copy_frame(in_cache, VideoFrame::Live);
            paging.remap_video_window(VideoFrame::Cache(scheduled).phys());
        }

        let term = &self.terminals[target];
        update_cursor(bus, term.cursor_x, term.cursor_y);
        self.displayed = target;
    }
}

/// Move the hardware cursor by programming the CRT controller.
pub fn update_cursor(bus: &mut dyn PortBus, x: usize, y: usize) {
    let position = (y * COLS + x) as u16;
    bus.outb(VGA_INDEX_REGISTER, CURSOR_LOW_BYTE);
    bus.outb(VGA_DATA_REGISTER, (position & 0xFF) as u8);
    bus.outb(VGA_INDEX_REGISTER, CURSOR_HIGH_BYTE);
    bus.outb(VGA_DATA_REGISTER, (position >> 8) as u8);
}

fn scroll(frame: &mut [u16; CELLS]) {
    frame.copy_within(COLS.., 0);
    frame[CELLS - COLS..].fill(BLANK);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::platform::{MachineState, RecordingBus};

    fn mux() -> (TerminalMux, VideoMem, Paging, RecordingBus) {
        let mut video = VideoMem::new();
        let mut bus = RecordingBus::new();
        let mux = TerminalMux::new(&mut video, &mut bus);
        (mux, video, Paging::new(NUM_TERMINALS), bus)
    }

    #[test]
    fn line_round_trip() {
        let (mut mux, _, _, _) = mux();
        let mut platform = MachineState::new();
        for &b in b"hello\n" {
            mux.putc_to_buffer(0, b);
        }
        assert!(mux.line_ready(0));

        let mut buf = [0u8; 64];
        let n = mux.read_line(0, &mut buf, &mut platform);
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");
        // Buffer is reset: a second read would block again
        assert!(!mux.line_ready(0));
    }

    #[test]
    fn backspace_never_underflows() {
        let (mut mux, _, _, _) = mux();
        mux.putc_to_buffer(1, 0x08);
        mux.putc_to_buffer(1, 0x08);
        assert!(!mux.line_ready(1));
        for &b in b"ab" {
            mux.putc_to_buffer(1, b);
        }
        mux.putc_to_buffer(1, 0x08);
        mux.putc_to_buffer(1, b'\n');

        let mut buf = [0u8; 8];
        let mut platform = MachineState::new();
        let n = mux.read_line(1, &mut buf, &mut platform);
        assert_eq!(&buf[..n], b"a");
    }

    #[test]
    fn overflow_drops_silently() {
        let (mut mux, _, _, _) = mux();
        for _ in 0..LINE_BUFFER + 20 {
            mux.putc_to_buffer(0, b'x');
        }
        mux.putc_to_buffer(0, b'\n');
        let mut buf = [0u8; LINE_BUFFER + 32];
        let mut platform = MachineState::new();
        let n = mux.read_line(0, &mut buf, &mut platform);
        assert_eq!(n, LINE_BUFFER - 1);
    }

    #[test]
    fn write_lands_in_window_frame() {
        let (mut mux, mut video, mut paging, mut bus) = mux();
        // Window at the live frame: bytes land on screen
        let n = mux
            .write(0, b"ok", &paging, &mut video, &mut bus)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(video.frame(VideoFrame::Live)[0] & 0xFF, b'o' as u16);

        // Retarget the window at terminal 1's cache: background output
        paging.remap_video_window(VideoFrame::Cache(1).phys());
        mux.write(1, b"bg", &paging, &mut video, &mut bus).unwrap();
        assert_eq!(video.frame(VideoFrame::Cache(1))[0] & 0xFF, b'b' as u16);
        // The live frame kept its original contents
        assert_eq!(video.frame(VideoFrame::Live)[0] & 0xFF, b'o' as u16);
    }

    #[test]
    fn write_rejects_empty_buffer() {
        let (mut mux, mut video, paging, mut bus) = mux();
        assert_eq!(
            mux.write(0, b"", &paging, &mut video, &mut bus),
            Err(TerminalError::InvalidBuffer)
        );
    }

    #[test]
    fn write_scrolls_at_last_row() {
        let (mut mux, mut video, paging, mut bus) = mux();
        mux.write(0, b"top\n", &paging, &mut video, &mut bus).unwrap();
        // Fill the remaining rows and one more line to force a scroll
        for _ in 0..ROWS {
            mux.write(0, b"line\n", &paging, &mut video, &mut bus).unwrap();
        }
        let term = mux.get(0);
        assert_eq!(term.cursor_y, ROWS - 1);
        assert_eq!(term.cursor_x, 0);
        // "top" scrolled off; the first visible row is a "line" row
        assert_eq!(video.frame(VideoFrame::Live)[0] & 0xFF, b'l' as u16);
    }

    #[test]
    fn switch_is_noop_for_same_or_invalid_target() {
        let (mut mux, mut video, mut paging, mut bus) = mux();
        let flushes = paging.tlb_flushes();
        mux.switch_to(0, 0, &mut paging, &mut video, &mut bus);
        mux.switch_to(7, 0, &mut paging, &mut video, &mut bus);
        assert_eq!(mux.displayed, 0);
        assert_eq!(paging.tlb_flushes(), flushes);
    }

    #[test]
    fn switch_round_trip_restores_screen_bytes() {
        let (mut mux, mut video, mut paging, mut bus) = mux();
        mux.write(0, b"first terminal", &paging, &mut video, &mut bus)
            .unwrap();
        let before: Vec<u8> = video.frame_bytes(VideoFrame::Live).to_vec();

        mux.switch_to(1, 0, &mut paging, &mut video, &mut bus);
        mux.switch_to(0, 0, &mut paging, &mut video, &mut bus);
        assert_eq!(mux.displayed, 0);
        assert_eq!(video.frame_bytes(VideoFrame::Live), &before[..]);
    }

    #[test]
    fn switch_leaves_window_on_scheduled_terminal() {
        let (mut mux, mut video, mut paging, mut bus) = mux();
        // Scheduler favors terminal 0; displaying terminal 1 must leave the
        // window on terminal 0's cache.
        mux.switch_to(1, 0, &mut paging, &mut video, &mut bus);
        assert_eq!(paging.video_window(), VideoFrame::Cache(0).phys());

        // Switching back to the scheduled terminal maps real video memory.
        mux.switch_to(0, 0, &mut paging, &mut video, &mut bus);
        assert_eq!(paging.video_window(), VideoFrame::Live.phys());
    }

    #[test]
    fn cursor_updates_program_crt_registers() {
        let mut bus = RecordingBus::new();
        update_cursor(&mut bus, 5, 2);
        let pos = (2 * COLS + 5) as u16;
        assert_eq!(
            bus.writes,
            vec![
                (VGA_INDEX_REGISTER, 0x0F),
                (VGA_DATA_REGISTER, (pos & 0xFF) as u8),
                (VGA_INDEX_REGISTER, 0x0E),
                (VGA_DATA_REGISTER, (pos >> 8) as u8),
            ]
        );
    }
}
