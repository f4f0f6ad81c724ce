//! Position tokens and per-segment delivery slots

use std::fmt;

/// Delivery order of a segment within one turn
pub type Position = u64;

/// Hands out position tokens in admission order
///
/// Owned by a single turn; never shared between clients.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: Position,
}

impl Sequencer {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Claim the next position
    pub const fn admit(&mut self) -> Position {
        let position = self.next;
        self.next += 1;
        position
    }

    /// Number of positions handed out since the last reset
    #[must_use]
    pub const fn issued(&self) -> Position {
        self.next
    }

    /// Start numbering from zero again
    pub const fn reset(&mut self) {
        self.next = 0;
    }
}

/// Where a payload sits in the delivery order
///
/// `fragment` indexes payloads inside one segment, so a streamed segment owns
/// the sub-range `(position, 0..=n)` and never collides with the next segment.
/// `last` closes the segment and lets delivery move to `position + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub position: Position,
    pub fragment: u32,
    pub last: bool,
}

impl Slot {
    /// The only slot of a whole-file or silent segment
    #[must_use]
    pub const fn whole(position: Position) -> Self {
        Self {
            position,
            fragment: 0,
            last: true,
        }
    }

    /// A streamed fragment that more payloads will follow
    #[must_use]
    pub const fn fragment(position: Position, fragment: u32) -> Self {
        Self {
            position,
            fragment,
            last: false,
        }
    }

    /// The end-of-stream marker closing a streamed segment
    #[must_use]
    pub const fn end_of_stream(position: Position, fragment: u32) -> Self {
        Self {
            position,
            fragment,
            last: true,
        }
    }

    /// Ordering key within the reassembly buffer
    #[must_use]
    pub const fn key(&self) -> (Position, u32) {
        (self.position, self.fragment)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.position, self.fragment)
    }
}
