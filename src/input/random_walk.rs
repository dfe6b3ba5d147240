use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

use super::{Tick, TickFeed};
use crate::clock::DateTime;
use crate::error::{Result, SimError};

/// Synthetic prices from a random walk with momentum.
///
/// Each step draws a normal shock scaled by `volatility` and folds it into a persistent trend
/// term, `trend = persistence * trend + shock`, so consecutive returns are serially correlated.
/// The price moves by `exp(trend)` which keeps it positive. The quote straddles the price by
/// half the spread on each side and the last trade prints at one of the two touches.
pub struct RandomWalk {
    rng: StdRng,
    shock: Normal<f64>,
    size: Uniform<f64>,
    price: f64,
    trend: f64,
    persistence: f64,
    spread: f64,
    interval: i64,
    time: DateTime,
    end: Option<DateTime>,
    open: f64,
    high: f64,
    low: f64,
    volume: f64,
}

impl RandomWalk {
    pub fn new(
        start_price: f64,
        volatility: f64,
        interval_secs: i64,
        start: impl Into<DateTime>,
    ) -> Result<Self> {
        if start_price.is_nan() || start_price <= 0.0 || interval_secs <= 0 {
            return Err(SimError::invalid_order(format!(
                "random walk needs a positive price and interval, got {} and {}",
                start_price, interval_secs
            )));
        }
        let shock = Normal::new(0.0, volatility).map_err(|e| {
            SimError::invalid_order(format!("random walk volatility {}: {}", volatility, e))
        })?;
        Ok(Self {
            rng: StdRng::from_entropy(),
            shock,
            size: Uniform::new(100.0, 1000.0),
            price: start_price,
            trend: 0.0,
            persistence: 0.5,
            spread: start_price * 0.0002,
            interval: interval_secs,
            time: start.into(),
            end: None,
            open: start_price,
            high: start_price,
            low: start_price,
            volume: 0.0,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = spread.abs();
        self
    }

    pub fn with_persistence(mut self, persistence: f64) -> Self {
        self.persistence = persistence.clamp(0.0, 0.99);
        self
    }

    pub fn until(mut self, end: impl Into<DateTime>) -> Self {
        self.end = Some(end.into());
        self
    }

    fn step(&mut self) {
        let shock = self.shock.sample(&mut self.rng);
        self.trend = self.persistence * self.trend + shock;
        self.price *= self.trend.exp();
    }
}

impl TickFeed for RandomWalk {
    fn next(&mut self) -> Result<Option<Tick>> {
        if let Some(end) = self.end {
            if self.time > end {
                return Ok(None);
            }
        }

        let half = self.spread / 2.0;
        let bid = (self.price - half).max(f64::MIN_POSITIVE);
        let ask = self.price + half;
        let last = if self.rng.gen_bool(0.5) { bid } else { ask };
        let last_size = self.size.sample(&mut self.rng).round();
        self.volume += last_size;
        self.high = self.high.max(last);
        self.low = self.low.min(last);

        let tick = Tick {
            bid: Some(bid),
            bid_size: self.size.sample(&mut self.rng).round(),
            ask: Some(ask),
            ask_size: self.size.sample(&mut self.rng).round(),
            last: Some(last),
            last_size,
            high: Some(self.high),
            low: Some(self.low),
            close: Some(self.open),
            volume: self.volume,
            last_trade_time: self.time,
            time: self.time,
        };

        self.time = self.time.plus(self.interval);
        self.step();
        Ok(Some(tick))
    }
}

#[cfg(test)]
mod tests {
    use super::RandomWalk;
    use crate::input::TickFeed;

    fn collect(walk: &mut RandomWalk, n: usize) -> Vec<crate::input::Tick> {
        let mut res = Vec::new();
        for _ in 0..n {
            res.push(walk.next().unwrap().unwrap());
        }
        res
    }

    #[test]
    fn test_that_ticks_are_self_consistent() {
        let mut walk = RandomWalk::new(100.0, 0.001, 1, 1_000).unwrap().with_seed(7);
        for tick in collect(&mut walk, 500) {
            let bid = tick.bid.unwrap();
            let ask = tick.ask.unwrap();
            let last = tick.last.unwrap();
            assert!(bid > 0.0);
            assert!(bid <= ask);
            assert!(last >= bid && last <= ask);
            assert!(tick.high.unwrap() >= tick.low.unwrap());
        }
    }

    #[test]
    fn test_that_ticks_are_spaced_by_interval() {
        let mut walk = RandomWalk::new(100.0, 0.001, 5, 1_000).unwrap().with_seed(7);
        let ticks = collect(&mut walk, 3);
        assert_eq!(*ticks[0].time, 1_000);
        assert_eq!(*ticks[1].time, 1_005);
        assert_eq!(*ticks[2].time, 1_010);
    }

    #[test]
    fn test_that_same_seed_reproduces_path() {
        let mut first = RandomWalk::new(50.0, 0.01, 1, 0).unwrap().with_seed(42);
        let mut second = RandomWalk::new(50.0, 0.01, 1, 0).unwrap().with_seed(42);
        assert_eq!(collect(&mut first, 50), collect(&mut second, 50));
    }

    #[test]
    fn test_that_increments_are_positively_correlated_with_momentum() {
        let mut walk = RandomWalk::new(100.0, 0.001, 1, 0)
            .unwrap()
            .with_seed(3)
            .with_spread(0.0)
            .with_persistence(0.8);
        let prices: Vec<f64> = collect(&mut walk, 5_000)
            .iter()
            .map(|t| t.last.unwrap().ln())
            .collect();
        let returns: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let mut cov = 0.0;
        let mut var = 0.0;
        for w in returns.windows(2) {
            cov += (w[0] - mean) * (w[1] - mean);
        }
        for r in &returns {
            var += (r - mean).powi(2);
        }
        assert!(cov / var > 0.5);
    }

    #[test]
    fn test_that_walk_stops_at_end() {
        let mut walk = RandomWalk::new(100.0, 0.001, 10, 0).unwrap().until(25);
        assert!(walk.next().unwrap().is_some());
        assert!(walk.next().unwrap().is_some());
        assert!(walk.next().unwrap().is_some());
        assert!(walk.next().unwrap().is_none());
    }

    #[test]
    fn test_that_bad_parameters_are_rejected() {
        assert!(RandomWalk::new(-1.0, 0.01, 1, 0).is_err());
        assert!(RandomWalk::new(1.0, 0.01, 0, 0).is_err());
        assert!(RandomWalk::new(1.0, -0.01, 1, 0).is_err());
    }
}
