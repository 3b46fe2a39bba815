use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// One of the two alternating dataset slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Slot1,
    Slot2,
}

impl Generation {
    /// The slot a refresh should write into when `active` is live
    pub fn refresh_target(active: Option<Generation>) -> Generation {
        match active {
            Some(Generation::Slot1) => Generation::Slot2,
            Some(Generation::Slot2) | None => Generation::Slot1,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Generation::Slot1 => 1,
            Generation::Slot2 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Generation::Slot1),
            2 => Some(Generation::Slot2),
            _ => None,
        }
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Generation::from_id)
            .ok_or_else(|| format!("invalid generation pointer: {:?}", s))
    }
}

/// Addressable slot of the store: bookkeeping (0) or one of the generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSlot {
    Bookkeeping,
    Data(Generation),
}

impl StoreSlot {
    pub fn index(self) -> usize {
        match self {
            StoreSlot::Bookkeeping => 0,
            StoreSlot::Data(generation) => generation.id() as usize,
        }
    }
}

/// Process-local record of the last generation this process observed.
///
/// `0` encodes "never loaded". It is reported by `/generation` and in logs;
/// whether a local view is rebuilt is decided by the view itself, not by this
/// pointer. Updates go through compare-and-swap so a stale observer cannot
/// overwrite a newer observation.
#[derive(Debug, Default)]
pub struct GenerationPointer(AtomicU8);

impl GenerationPointer {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn load(&self) -> Option<Generation> {
        Generation::from_id(self.0.load(Ordering::Acquire))
    }

    /// Moves the pointer from `expected` to `next`; returns false if another
    /// thread published first.
    pub fn publish(&self, expected: Option<Generation>, next: Generation) -> bool {
        let current = expected.map(Generation::id).unwrap_or(0);
        self.0
            .compare_exchange(current, next.id(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}
