use std::collections::VecDeque;

/// Rolling window of closed-bar closes plus the latest price of the bar
/// that is still forming.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    closes: VecDeque<f64>,
    forming: Option<f64>,
    capacity: usize,
}

impl PriceHistory {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        Self {
            closes: VecDeque::with_capacity(capacity.max(1)),
            forming: None,
            capacity: capacity.max(1),
        }
    }

    /// Record a price update. A closed bar is appended to the window and
    /// clears the forming value.
    pub fn push(&mut self, price: f64, bar_closed: bool) {
        if bar_closed {
            self.closes.push_back(price);
            if self.closes.len() > self.capacity {
                self.closes.pop_front();
            }
            self.forming = None;
        } else {
            self.forming = Some(price);
        }
    }

    /// Closed bars only, oldest first.
    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.closes.iter().copied()
    }

    /// Closed bars followed by the forming price, oldest first.
    pub fn series(&self) -> Vec<f64> {
        self.closes.iter().copied().chain(self.forming).collect()
    }

    /// Most recent price, forming or closed.
    pub fn last(&self) -> Option<f64> {
        self.forming.or_else(|| self.closes.back().copied())
    }

    pub fn len(&self) -> usize {
        self.closes.len() + usize::from(self.forming.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
