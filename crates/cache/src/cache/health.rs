//! Health diagnostics over backend statistics

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use super::stats::BackendStats;

/// Hit rate below which a busy cache is flagged
const LOW_HIT_RATE: f64 = 0.5;
/// Accesses needed before the hit rate is judged
const MIN_ACCESSES: u64 = 100;
const NEAR_CAPACITY: f64 = 0.85;
/// Error rates above these mark a degraded or failing backend
const DEGRADED_ERROR_RATE: f64 = 0.05;
const CRITICAL_ERROR_RATE: f64 = 0.5;

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheHealth {
    /// Cache is operating normally
    Healthy,
    /// Cache hit rate is low, consider tuning
    LowHitRate,
    /// Cache is nearly full, consider increasing size
    NearCapacity,
    /// Backend failures are absorbed often enough to cost hits
    Degraded,
    /// Backend mostly failing, or low hit rate while near capacity
    Critical,
}

impl fmt::Display for CacheHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::LowHitRate => write!(f, "Low Hit Rate"),
            Self::NearCapacity => write!(f, "Near Capacity"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Cache health report with diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealthReport {
    /// Overall health status
    pub health: CacheHealth,
    /// Statistics the report was built from
    pub stats: BackendStats,
    /// Recommendations for optimization
    pub recommendations: Vec<String>,
}

impl CacheHealthReport {
    /// Classify a statistics snapshot
    ///
    /// # Thresholds
    /// - Low hit rate: < 50% once more than 100 reads were seen
    /// - Near capacity: > 85% full
    /// - Degraded: > 5% of operations failed at the backend boundary
    /// - Critical: > 50% failed, or low hit rate while near capacity
    pub fn from_stats(stats: BackendStats) -> Self {
        let mut recommendations = Vec::new();

        let low_hit_rate =
            stats.hit_rate() < LOW_HIT_RATE && stats.total_accesses() > MIN_ACCESSES;
        if low_hit_rate {
            recommendations.push(format!(
                "Hit rate is {:.2}%. Consider increasing max_entries or the default TTL.",
                stats.hit_rate() * 100.0
            ));
        }

        let fill = stats.fill_percentage().unwrap_or(0.0);
        let near_capacity = fill > NEAR_CAPACITY;
        if near_capacity {
            recommendations.push(format!(
                "Cache is {:.1}% full. Consider increasing max_entries.",
                fill * 100.0
            ));
        }

        if stats.total_accesses() > 0 {
            let eviction_rate = stats.evictions as f64 / stats.total_accesses() as f64;
            if eviction_rate > 0.2 {
                recommendations.push(format!(
                    "High eviction rate: {:.2}%. Cache may be too small for workload.",
                    eviction_rate * 100.0
                ));
            }

            let expiration_rate = stats.expirations as f64 / stats.total_accesses() as f64;
            if expiration_rate > 0.3 {
                recommendations.push(format!(
                    "High expiration rate: {:.2}%. Consider increasing TTL.",
                    expiration_rate * 100.0
                ));
            }
        }

        let error_rate = stats.error_rate();
        if error_rate > DEGRADED_ERROR_RATE {
            recommendations.push(format!(
                "{:.2}% of {} backend operations failed. Check connectivity and storage.",
                error_rate * 100.0,
                stats.backend
            ));
        }

        let health = if error_rate > CRITICAL_ERROR_RATE {
            CacheHealth::Critical
        } else if error_rate > DEGRADED_ERROR_RATE {
            CacheHealth::Degraded
        } else {
            match (low_hit_rate, near_capacity) {
                (true, true) => CacheHealth::Critical,
                (true, false) => CacheHealth::LowHitRate,
                (false, true) => CacheHealth::NearCapacity,
                (false, false) => CacheHealth::Healthy,
            }
        };

        Self { health, stats, recommendations }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == CacheHealth::Healthy
    }

    /// Log the health report using tracing
    pub fn log(&self) {
        match self.health {
            CacheHealth::Healthy => {
                info!(
                    health = %self.health,
                    backend = self.stats.backend,
                    hit_rate = self.stats.hit_rate(),
                    entries = self.stats.entries,
                    "Cache health check: Healthy"
                );
            }
            _ => {
                warn!(
                    health = %self.health,
                    backend = self.stats.backend,
                    hit_rate = self.stats.hit_rate(),
                    error_rate = self.stats.error_rate(),
                    entries = self.stats.entries,
                    max_entries = ?self.stats.max_entries,
                    "Cache health check: Issues detected"
                );
                for rec in &self.recommendations {
                    warn!(recommendation = %rec, "Cache optimization recommendation");
                }
            }
        }
    }
}

impl fmt::Display for CacheHealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Health Report ({})", self.stats.backend)?;
        writeln!(f, "===================")?;
        writeln!(f, "Status: {}", self.health)?;
        writeln!(f)?;
        writeln!(f, "Statistics:")?;
        writeln!(f, "  Entries: {}/{:?}", self.stats.entries, self.stats.max_entries)?;
        writeln!(f, "  Hits: {}", self.stats.hits)?;
        writeln!(f, "  Misses: {}", self.stats.misses)?;
        writeln!(f, "  Hit Rate: {:.2}%", self.stats.hit_rate() * 100.0)?;
        writeln!(f, "  Evictions: {}", self.stats.evictions)?;
        writeln!(f, "  Expirations: {}", self.stats.expirations)?;
        writeln!(f, "  Errors: {}", self.stats.errors)?;
        if let Some(fill_pct) = self.stats.fill_percentage() {
            writeln!(f, "  Fill: {:.1}%", fill_pct * 100.0)?;
        }

        if !self.recommendations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recommendations:")?;
            for (i, rec) in self.recommendations.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, rec)?;
            }
        }

        Ok(())
    }
}
