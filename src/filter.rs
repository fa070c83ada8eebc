use log::debug;
use std::collections::VecDeque;

/// Lowest and highest weight exponents across the position window
const RECENCY_EXPONENT_RANGE: (f64, f64) = (-2.0, 0.0);

/// Filter phase, derived from queue contents rather than stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// No position emitted yet
    Empty,
    /// Fewer than two positions queued; input passes through unchanged
    Warming,
    /// Weighted window average blended with the previous output
    Steady,
}

#[derive(Debug, Clone)]
pub struct TemporalFilter {
    window_size: usize,
    alpha: f64,
    rssi_history_a: VecDeque<i32>,
    rssi_history_b: VecDeque<i32>,
    position_history: VecDeque<(f64, f64)>,
    last_filtered_position: Option<(f64, f64)>,
}

impl TemporalFilter {
    /// `window_size` bounds every history queue; a window of 1 turns both
    /// stages into pass-through. `alpha` weights the new windowed average
    /// against the previous output: higher reacts faster, lower smooths more.
    pub fn new(window_size: usize, alpha: f64) -> Self {
        let window_size = window_size.max(1);
        TemporalFilter {
            window_size,
            alpha,
            rssi_history_a: VecDeque::with_capacity(window_size),
            rssi_history_b: VecDeque::with_capacity(window_size),
            position_history: VecDeque::with_capacity(window_size),
            last_filtered_position: None,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn last_filtered_position(&self) -> Option<(f64, f64)> {
        self.last_filtered_position
    }

    /// Queue lengths as `(rssi_a, rssi_b, positions)`
    pub fn history_lengths(&self) -> (usize, usize, usize) {
        (
            self.rssi_history_a.len(),
            self.rssi_history_b.len(),
            self.position_history.len(),
        )
    }

    pub fn phase(&self) -> FilterPhase {
        match (self.last_filtered_position, self.position_history.len()) {
            (None, _) => FilterPhase::Empty,
            (Some(_), len) if len < 2 => FilterPhase::Warming,
            _ => FilterPhase::Steady,
        }
    }

    /// Push one RSSI pair and return the median of each window
    pub fn filter_rssi(&mut self, rssi_a: i32, rssi_b: i32) -> (i32, i32) {
        push_bounded(&mut self.rssi_history_a, rssi_a, self.window_size);
        push_bounded(&mut self.rssi_history_b, rssi_b, self.window_size);

        (
            truncated_median(&self.rssi_history_a),
            truncated_median(&self.rssi_history_b),
        )
    }

    /// Distance from the last emitted position, if any
    pub fn jump_distance(&self, x: f64, y: f64) -> Option<f64> {
        self.last_filtered_position
            .map(|(last_x, last_y)| ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt())
    }

    /// Whether `(x, y)` lies more than `threshold` meters from the last output.
    /// Always false before the first output.
    pub fn is_outlier(&self, x: f64, y: f64, threshold: f64) -> bool {
        self.jump_distance(x, y)
            .map(|distance| distance > threshold)
            .unwrap_or(false)
    }

    /// Push a position and return the smoothed position
    pub fn filter_position(&mut self, x: f64, y: f64) -> (f64, f64) {
        push_bounded(&mut self.position_history, (x, y), self.window_size);

        if self.position_history.len() < 2 {
            self.last_filtered_position = Some((x, y));
            return (x, y);
        }

        let (avg_x, avg_y) = self.windowed_average();
        let filtered = match self.last_filtered_position {
            Some((last_x, last_y)) => (
                self.alpha * avg_x + (1.0 - self.alpha) * last_x,
                self.alpha * avg_y + (1.0 - self.alpha) * last_y,
            ),
            None => (avg_x, avg_y),
        };
        debug!(
            "Window average ({:.4}, {:.4}) -> filtered ({:.4}, {:.4})",
            avg_x, avg_y, filtered.0, filtered.1
        );

        self.last_filtered_position = Some(filtered);
        filtered
    }

    /// Recency-weighted mean of the queued positions
    fn windowed_average(&self) -> (f64, f64) {
        let weights = recency_weights(self.position_history.len());
        self.position_history
            .iter()
            .zip(weights.iter())
            .fold((0.0, 0.0), |(sum_x, sum_y), ((x, y), w)| {
                (sum_x + x * w, sum_y + y * w)
            })
    }
}

/// `exp(linspace(-2, 0, n))` normalized to sum to 1, oldest first
pub fn recency_weights(n: usize) -> Vec<f64> {
    let (start, stop) = RECENCY_EXPONENT_RANGE;
    let raw: Vec<f64> = match n {
        0 => Vec::new(),
        1 => vec![stop.exp()],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let exponent = if i == n - 1 { stop } else { start + i as f64 * step };
                    exponent.exp()
                })
                .collect()
        }
    };

    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
    while queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// Arithmetic median truncated toward zero, e.g. [-60, -61] -> -60
fn truncated_median(values: &VecDeque<i32>) -> i32 {
    let mut sorted: Vec<i32> = values.iter().copied().collect();
    sorted.sort_unstable();

    let len = sorted.len();
    if len == 0 {
        return 0;
    }
    let median = if len % 2 == 0 {
        (sorted[len / 2 - 1] as f64 + sorted[len / 2] as f64) / 2.0
    } else {
        sorted[len / 2] as f64
    };
    median.trunc() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rssi_median() {
        let mut filter = TemporalFilter::new(3, 0.3);

        assert_eq!(filter.filter_rssi(-60, -70), (-60, -70));
        // [-60, -61] -> -60.5 -> -60 ; [-70, -50] -> -60
        assert_eq!(filter.filter_rssi(-61, -50), (-60, -60));
        assert_eq!(filter.filter_rssi(-90, -52), (-61, -52));
        // -60 evicted: [-61, -90, -59]
        assert_eq!(filter.filter_rssi(-59, -51), (-61, -51));
    }

    #[test]
    fn test_single_slot_pass_through() {
        let mut filter = TemporalFilter::new(1, 1.0);

        assert_eq!(filter.filter_rssi(-60, -65), (-60, -65));
        assert_eq!(filter.filter_rssi(-80, -45), (-80, -45));

        assert_eq!(filter.filter_position(0.10, 0.20), (0.10, 0.20));
        assert_eq!(filter.filter_position(0.25, 0.05), (0.25, 0.05));
        assert_eq!(filter.phase(), FilterPhase::Warming);
    }

    #[test]
    fn test_warm_up_then_blend() {
        let mut filter = TemporalFilter::new(5, 0.3);
        assert_eq!(filter.phase(), FilterPhase::Empty);

        assert_eq!(filter.filter_position(0.10, 0.20), (0.10, 0.20));
        assert_eq!(filter.phase(), FilterPhase::Warming);

        let (x, y) = filter.filter_position(0.20, 0.10);
        let w = recency_weights(2);
        let avg_x = w[0] * 0.10 + w[1] * 0.20;
        let avg_y = w[0] * 0.20 + w[1] * 0.10;
        assert!((x - (0.3 * avg_x + 0.7 * 0.10)).abs() < 1e-12);
        assert!((y - (0.3 * avg_y + 0.7 * 0.20)).abs() < 1e-12);
        assert_eq!(filter.phase(), FilterPhase::Steady);
        assert_eq!(filter.last_filtered_position(), Some((x, y)));
    }

    #[test]
    fn test_recency_weights() {
        let w = recency_weights(5);
        assert_eq!(w.len(), 5);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((w[4] / w[0] - 2f64.exp()).abs() < 1e-9);
        assert!(w.windows(2).all(|pair| pair[0] < pair[1]));

        assert_eq!(recency_weights(1), vec![1.0]);
        assert!(recency_weights(0).is_empty());
    }

    #[test]
    fn test_window_bound() {
        let window = 4;
        let mut filter = TemporalFilter::new(window, 0.5);

        for call in 1..=10usize {
            filter.filter_rssi(-60 - call as i32, -70);
            filter.filter_position(0.01 * call as f64, 0.02);
            let expected = call.min(window);
            assert_eq!(filter.history_lengths(), (expected, expected, expected));
        }
    }

    #[test]
    fn test_outlier_detection() {
        let mut filter = TemporalFilter::new(5, 0.3);
        assert!(!filter.is_outlier(5.0, 5.0, 0.10));

        filter.filter_position(0.05, 0.05);
        assert!(!filter.is_outlier(0.10, 0.10, 0.10));
        assert!(filter.is_outlier(0.20, 0.20, 0.10));
        assert!((filter.jump_distance(0.08, 0.09).unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_constant_input_stays_constant() {
        let mut filter = TemporalFilter::new(5, 0.3);
        for _ in 0..20 {
            let (x, y) = filter.filter_position(0.10, 0.10);
            assert!((x - 0.10).abs() < 1e-12);
            assert!((y - 0.10).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_window_treated_as_one() {
        let filter = TemporalFilter::new(0, 0.3);
        assert_eq!(filter.window_size(), 1);
    }
}
