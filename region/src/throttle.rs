//! Per-circuit bandwidth throttling.
//!
//! Each throttled category has a token bucket measured in bytes. A packet
//! that does not fit is queued (bounded) or rejected depending on the
//! overflow policy, and queued packets leave in FIFO order as the buckets
//! refill.

use crate::config::{OverflowPolicy, ThrottleConfig};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleCategory {
    Resend,
    Land,
    Wind,
    Cloud,
    Task,
    Texture,
    Asset,
    /// Acks, ping replies and other control traffic. Never throttled.
    Unknown,
}

impl ThrottleCategory {
    /// Throttled categories, in AgentThrottle wire order.
    pub const THROTTLED: [ThrottleCategory; 7] = [
        ThrottleCategory::Resend,
        ThrottleCategory::Land,
        ThrottleCategory::Wind,
        ThrottleCategory::Cloud,
        ThrottleCategory::Task,
        ThrottleCategory::Texture,
        ThrottleCategory::Asset,
    ];

    fn index(self) -> Option<usize> {
        Self::THROTTLED.iter().position(|c| *c == self)
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket that starts full.
    pub fn new(rate: f64, burst: f64, now: Instant) -> Self {
        Self {
            rate,
            burst,
            tokens: burst,
            last_refill: now,
        }
    }

    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// A full bucket admits one packet of any size.
    pub fn can_send(&self, bytes: usize) -> bool {
        self.tokens >= bytes as f64 || self.tokens >= self.burst
    }

    /// Spends tokens; the balance may go negative and is repaid by refills.
    pub fn consume(&mut self, bytes: usize) {
        self.tokens -= bytes as f64;
    }

    pub fn set_rate(&mut self, rate: f64, burst: f64) {
        self.rate = rate;
        self.burst = burst;
        self.tokens = self.tokens.min(burst);
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Result of offering a packet to the throttle.
#[derive(Debug, PartialEq)]
pub enum Admission<T> {
    /// Tokens were taken; transmit now.
    Send(T),
    /// Held until the bucket refills.
    Queued,
    /// Over the limit and not queued; the item is handed back.
    Rejected(T),
}

/// Buckets and pending queues for one circuit.
#[derive(Debug)]
pub struct CircuitThrottle<T> {
    buckets: Vec<TokenBucket>,
    // Configured burst / rate per bucket.
    burst_ratios: Vec<f64>,
    queues: Vec<VecDeque<(usize, T)>>,
    policy: OverflowPolicy,
    max_queued: usize,
    min_rate: f64,
    max_rate: f64,
}

impl<T> CircuitThrottle<T> {
    pub fn new(config: &ThrottleConfig, now: Instant) -> Self {
        let rates: Vec<_> = ThrottleCategory::THROTTLED
            .iter()
            .filter_map(|c| config.rate_for(*c))
            .collect();
        let buckets = rates.iter().map(|r| TokenBucket::new(r.rate, r.burst, now)).collect();
        let burst_ratios = rates
            .iter()
            .map(|r| if r.rate > 0.0 { r.burst / r.rate } else { 1.0 })
            .collect();

        Self {
            buckets,
            burst_ratios,
            queues: ThrottleCategory::THROTTLED.iter().map(|_| VecDeque::new()).collect(),
            policy: config.overflow,
            max_queued: config.max_queued_per_category,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
        }
    }

    pub fn can_send(&self, category: ThrottleCategory, bytes: usize) -> bool {
        match category.index() {
            Some(i) => self.buckets[i].can_send(bytes),
            None => true,
        }
    }

    pub fn consume(&mut self, category: ThrottleCategory, bytes: usize) {
        if let Some(i) = category.index() {
            self.buckets[i].consume(bytes);
        }
    }

    /// Refills one bucket for the time elapsed since its last refill.
    pub fn reset(&mut self, category: ThrottleCategory, now: Instant) {
        if let Some(i) = category.index() {
            self.buckets[i].refill(now);
        }
    }

    pub fn bucket(&self, category: ThrottleCategory) -> Option<&TokenBucket> {
        category.index().map(|i| &self.buckets[i])
    }

    /// Offers a packet of `bytes` bytes. Packets already queued in the same
    /// category go first, so a fresh packet never overtakes them.
    pub fn admit(&mut self, category: ThrottleCategory, bytes: usize, item: T, now: Instant) -> Admission<T> {
        let Some(i) = category.index() else {
            return Admission::Send(item);
        };

        self.buckets[i].refill(now);
        if self.queues[i].is_empty() && self.buckets[i].can_send(bytes) {
            self.buckets[i].consume(bytes);
            return Admission::Send(item);
        }

        match self.policy {
            OverflowPolicy::Queue if self.queues[i].len() < self.max_queued => {
                self.queues[i].push_back((bytes, item));
                Admission::Queued
            }
            _ => Admission::Rejected(item),
        }
    }

    /// Refills every bucket and pops the queued packets that now fit.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<(ThrottleCategory, T)> {
        let mut ready = Vec::new();
        for (i, category) in ThrottleCategory::THROTTLED.iter().enumerate() {
            let bucket = &mut self.buckets[i];
            bucket.refill(now);
            let queue = &mut self.queues[i];
            while let Some(&(bytes, _)) = queue.front() {
                if !bucket.can_send(bytes) {
                    break;
                }
                bucket.consume(bytes);
                if let Some((_, item)) = queue.pop_front() {
                    ready.push((*category, item));
                }
            }
        }
        ready
    }

    pub fn queued(&self, category: ThrottleCategory) -> usize {
        category.index().map_or(0, |i| self.queues[i].len())
    }

    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Applies client-requested rates in bytes per second, clamped to the
    /// configured range. Bursts keep their configured ratio to the rate.
    /// Values that are not finite leave their bucket untouched.
    pub fn set_rates(&mut self, bytes_per_second: &[f64]) {
        let targets = self.buckets.iter_mut().zip(&self.burst_ratios);
        for ((bucket, ratio), requested) in targets.zip(bytes_per_second) {
            if !requested.is_finite() {
                continue;
            }
            let rate = requested.clamp(self.min_rate, self.max_rate);
            bucket.set_rate(rate, rate * ratio);
        }
    }
}
