//! Hour-of-week send/click histograms, globally and per audience segment,
//! behind a short-lived rebuild cache.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::error::LifecycleResult;
use lifecycle_core::store::{ContactStore, MessageStore};
use lifecycle_core::types::{hour_of_week, round4, HOURS_PER_WEEK};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourHistogram {
    sends: [u64; HOURS_PER_WEEK],
    clicks: [u64; HOURS_PER_WEEK],
}

impl Default for HourHistogram {
    fn default() -> Self {
        Self {
            sends: [0; HOURS_PER_WEEK],
            clicks: [0; HOURS_PER_WEEK],
        }
    }
}

impl HourHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, hour: u32, clicked: bool) {
        let idx = hour as usize % HOURS_PER_WEEK;
        self.sends[idx] += 1;
        if clicked {
            self.clicks[idx] += 1;
        }
    }

    pub fn sends(&self, hour: u32) -> u64 {
        self.sends[hour as usize % HOURS_PER_WEEK]
    }

    pub fn clicks(&self, hour: u32) -> u64 {
        self.clicks[hour as usize % HOURS_PER_WEEK]
    }

    pub fn total_sends(&self) -> u64 {
        self.sends.iter().sum()
    }

    pub fn total_clicks(&self) -> u64 {
        self.clicks.iter().sum()
    }

    pub fn has_data(&self) -> bool {
        self.total_sends() > 0
    }

    /// Overall click rate, or `default_prior` when nothing was ever sent.
    pub fn prior(&self, default_prior: f64) -> f64 {
        let sends = self.total_sends();
        if sends > 0 {
            self.total_clicks() as f64 / sends as f64
        } else {
            default_prior
        }
    }

    /// `(clicks + alpha * prior) / (sends + alpha)` for one bucket.
    pub fn smoothed_score(&self, hour: u32, alpha: f64, prior: f64) -> f64 {
        (self.clicks(hour) as f64 + alpha * prior) / (self.sends(hour) as f64 + alpha)
    }

    /// Smoothed score of `hour` against this histogram's own prior.
    pub fn score(&self, hour: u32, alpha: f64, default_prior: f64) -> f64 {
        self.smoothed_score(hour, alpha, self.prior(default_prior))
    }

    /// Highest-scoring hour. Exact ties keep the lowest hour.
    pub fn best_hour(&self, alpha: f64, default_prior: f64) -> (u32, f64) {
        let prior = self.prior(default_prior);
        let mut best = (0u32, f64::NEG_INFINITY);
        for hour in 0..HOURS_PER_WEEK as u32 {
            let score = self.smoothed_score(hour, alpha, prior);
            if score > best.1 {
                best = (hour, score);
            }
        }
        best
    }

    pub fn heatmap(&self) -> Vec<HeatmapCell> {
        (0..HOURS_PER_WEEK as u32)
            .map(|hour| {
                let sends = self.sends(hour);
                let clicks = self.clicks(hour);
                HeatmapCell {
                    hour_of_week: hour,
                    sends,
                    clicks,
                    ctr: if sends > 0 {
                        round4(clicks as f64 / sends as f64)
                    } else {
                        0.0
                    },
                }
            })
            .collect()
    }

    /// Hour with the highest raw click-through rate among hours with sends,
    /// using the same first-seen tie-break as [`HourHistogram::best_hour`].
    pub fn best_ctr_hour(&self) -> Option<u32> {
        let mut best: Option<(u32, f64)> = None;
        for hour in 0..HOURS_PER_WEEK as u32 {
            let sends = self.sends(hour);
            if sends == 0 {
                continue;
            }
            let ctr = self.clicks(hour) as f64 / sends as f64;
            if best.map_or(true, |(_, b)| ctr > b) {
                best = Some((hour, ctr));
            }
        }
        best.map(|(hour, _)| hour)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapCell {
    pub hour_of_week: u32,
    pub sends: u64,
    pub clicks: u64,
    pub ctr: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
    pub segment: Option<String>,
    pub cells: Vec<HeatmapCell>,
    pub best_hour: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct HistogramSet {
    pub global: HourHistogram,
    pub segments: HashMap<String, HourHistogram>,
}

impl HistogramSet {
    pub fn segment(&self, name: &str) -> Option<&HourHistogram> {
        self.segments.get(name)
    }

    /// Rebuild from every sent message joined to its outcome. Segment is the
    /// recipient's current `segment=` tag.
    pub fn build(
        messages: &dyn MessageStore,
        contacts: &dyn ContactStore,
    ) -> LifecycleResult<Self> {
        let mut set = Self::default();
        let mut segment_of: HashMap<Uuid, Option<String>> = HashMap::new();

        for (message, outcome) in messages.sent_with_outcomes()? {
            let hour = hour_of_week(message.send_instant());
            let clicked = outcome.map(|o| o.clicked).unwrap_or(false);
            set.global.record(hour, clicked);

            let segment = match segment_of.get(&message.contact_id) {
                Some(cached) => cached.clone(),
                None => {
                    let seg = contacts
                        .get(&message.contact_id)?
                        .and_then(|c| c.segment().map(str::to_string));
                    segment_of.insert(message.contact_id, seg.clone());
                    seg
                }
            };
            if let Some(name) = segment {
                set.segments.entry(name).or_default().record(hour, clicked);
            }
        }

        Ok(set)
    }
}

struct CachedHistograms {
    built_at: DateTime<Utc>,
    set: Arc<HistogramSet>,
}

/// Time-bounded cache around a [`HistogramSet`]. The clock is always passed
/// in by the caller.
pub struct HistogramCache {
    ttl: Duration,
    entry: RwLock<Option<CachedHistograms>>,
}

impl HistogramCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub fn get_or_build(
        &self,
        now: DateTime<Utc>,
        build: impl FnOnce() -> LifecycleResult<HistogramSet>,
    ) -> LifecycleResult<Arc<HistogramSet>> {
        if let Some(cached) = self.entry.read().as_ref() {
            if cached.built_at <= now && now - cached.built_at < self.ttl {
                return Ok(Arc::clone(&cached.set));
            }
        }

        let set = Arc::new(build()?);
        debug!(
            global_sends = set.global.total_sends(),
            segments = set.segments.len(),
            "histograms rebuilt"
        );
        *self.entry.write() = Some(CachedHistograms {
            built_at: now,
            set: Arc::clone(&set),
        });
        Ok(set)
    }

    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }

    pub fn is_warm(&self) -> bool {
        self.entry.read().is_some()
    }
}

/// Histogram source shared by the optimizer and the outcome recorder.
pub struct HistogramStore {
    messages: Arc<dyn MessageStore>,
    contacts: Arc<dyn ContactStore>,
    cache: HistogramCache,
}

impl HistogramStore {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        contacts: Arc<dyn ContactStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            messages,
            contacts,
            cache: HistogramCache::new(ttl),
        }
    }

    pub fn histograms(&self, now: DateTime<Utc>) -> LifecycleResult<Arc<HistogramSet>> {
        self.cache.get_or_build(now, || {
            HistogramSet::build(self.messages.as_ref(), self.contacts.as_ref())
        })
    }

    /// Drop the cached histograms so the next read rebuilds them.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn is_warm(&self) -> bool {
        self.cache.is_warm()
    }

    pub fn heatmap(&self, segment: Option<&str>, now: DateTime<Utc>) -> LifecycleResult<Heatmap> {
        let set = self.histograms(now)?;
        let empty = HourHistogram::new();
        let histogram = match segment {
            Some(name) => set.segment(name).unwrap_or(&empty),
            None => &set.global,
        };
        Ok(Heatmap {
            segment: segment.map(str::to_string),
            cells: histogram.heatmap(),
            best_hour: histogram.best_ctr_hour(),
        })
    }
}
