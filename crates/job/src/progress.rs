/// Progress counter that never goes backwards.
///
/// Services may repeat or reorder progress ticks; only a higher value
/// changes what is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonotonicProgress {
    value: u8,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `percent` (clamped to 100). Returns `true` if the displayed
    /// value rose.
    pub fn observe(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.value {
            self.value = percent;
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> u8 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}
