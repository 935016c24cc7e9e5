//! Console input.
//!
//! The keyboard driver (ACIA polling, scan code translation) lives outside
//! the kernel and hands over ASCII characters through [`Keyboard`]. The
//! kernel keeps them in an [`InputQueue`] until a process reads a whole line.
pub use abyss::kprint::{Console, ConsoleWriter};

/// Capacity of the input queue.
pub const INPUT_CAPACITY: usize = 128;

/// Carriage return, the line terminator.
pub const CR: u8 = b'\r';
/// Backspace.
pub const BS: u8 = 0x08;

/// Source of translated keyboard characters.
pub trait Keyboard: Sync {
    /// Next character the keyboard produced, if any.
    fn poll(&self) -> Option<u8>;
}

/// What [`InputQueue::enqueue`] did with a character.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// Stored in the current line.
    Stored,
    /// A backspace removed the last character of the current line.
    Erased,
    /// A carriage return completed the current line.
    Line,
    /// Discarded: the queue is full, or a backspace had nothing to erase.
    Dropped,
}

/// Line-buffered input ring.
///
/// One byte is always kept free for a carriage return, so a line can be
/// completed even when the queue is full.
pub struct InputQueue {
    buf: [u8; INPUT_CAPACITY],
    head: usize,
    len: usize,
    // Characters after the last carriage return.
    partial: usize,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputQueue {
    /// An empty queue.
    pub const fn new() -> Self {
        Self {
            buf: [0; INPUT_CAPACITY],
            head: 0,
            len: 0,
            partial: 0,
        }
    }

    #[inline]
    fn at(&self, i: usize) -> usize {
        (self.head + i) % INPUT_CAPACITY
    }

    /// Add a character typed on the keyboard.
    pub fn enqueue(&mut self, ch: u8) -> Enqueued {
        match ch {
            BS if self.partial == 0 => Enqueued::Dropped,
            BS => {
                self.len -= 1;
                self.partial -= 1;
                Enqueued::Erased
            }
            CR if self.len < INPUT_CAPACITY => {
                self.buf[self.at(self.len)] = CR;
                self.len += 1;
                self.partial = 0;
                Enqueued::Line
            }
            ch if ch != CR && self.len < INPUT_CAPACITY - 1 => {
                self.buf[self.at(self.len)] = ch;
                self.len += 1;
                self.partial += 1;
                Enqueued::Stored
            }
            _ => Enqueued::Dropped,
        }
    }

    /// True if a complete line is queued.
    #[inline]
    pub fn has_line(&self) -> bool {
        self.len > self.partial
    }

    /// Move the oldest complete line into `buf`, without its carriage
    /// return, and return its length.
    ///
    /// Characters that don't fit in `buf` are discarded with the line. Returns
    /// `None` and leaves the queue alone if no line is complete.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.has_line() {
            return None;
        }
        let mut copied = 0;
        loop {
            let ch = self.buf[self.head];
            self.head = (self.head + 1) % INPUT_CAPACITY;
            self.len -= 1;
            if ch == CR {
                return Some(copied);
            }
            if let Some(slot) = buf.get_mut(copied) {
                *slot = ch;
                copied += 1;
            }
        }
    }

    /// Number of queued characters, including unfinished lines.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
