//! Synthetic light-sensor ticker
//!
//! Keeps the dashboard chart moving when the BH1750 node is not publishing.
//! Every tick synthesizes one light level and records it exactly like a
//! sample received on `esp32/Light_Data_BH1750`.
//!
//! The generated level follows a slow day/night swing with some noise, and
//! is always a whole number in [0, 100].

use chrono::Utc;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info};

use crate::state::AppState;

/// Ticks in one simulated day/night cycle
const CYCLE_TICKS: f64 = 60.0;

/// Synthetic light sensor producing one sample per interval
pub struct SyntheticSensor {
    /// Interval between samples in milliseconds
    interval_ms: u64,
    /// Midpoint of the day/night swing
    base_level: f64,
    /// Half the day/night swing
    amplitude: f64,
    /// Position in the current cycle, in radians
    phase: f64,
}

impl SyntheticSensor {
    pub fn new(interval_ms: u64) -> Self {
        info!(interval_ms = interval_ms, "Initializing synthetic light sensor");

        Self {
            interval_ms,
            base_level: 50.0,
            amplitude: 35.0,
            phase: 0.0,
        }
    }

    /// Next light level in [0, 100]
    fn next_level<R: rand::Rng + ?Sized>(&mut self, noise: &Normal<f64>, rng: &mut R) -> f64 {
        self.phase += std::f64::consts::TAU / CYCLE_TICKS;
        if self.phase > std::f64::consts::TAU {
            self.phase -= std::f64::consts::TAU;
        }

        let level = self.base_level + self.phase.sin() * self.amplitude + noise.sample(rng);
        level.clamp(0.0, 100.0).round()
    }

    /// Spawn the ticker. The first sample is produced one interval after start.
    pub fn spawn(self, state: Arc<RwLock<AppState>>) -> JoinHandle<()> {
        // IMPORTANT: use actix_rt::spawn (NOT tokio::spawn)
        actix_rt::spawn(self.run(state))
    }

    /// Run the ticker until the task is dropped or aborted
    pub async fn run(mut self, state: Arc<RwLock<AppState>>) {
        info!("Starting synthetic light sensor loop");

        let period = Duration::from_millis(self.interval_ms.max(1));
        let mut ticks = interval_at(Instant::now() + period, period);
        let noise = match Normal::new(0.0, 4.0) {
            Ok(noise) => noise,
            Err(_) => return,
        };

        let mut tick_count: u64 = 0;

        loop {
            ticks.tick().await;
            tick_count += 1;

            let level = self.next_level(&noise, &mut rand::thread_rng());

            // range faults are recorded by the state itself
            let recorded = state.write().await.record_sample(level, Utc::now());

            debug!(
                tick = tick_count,
                level = level,
                recorded = recorded.is_ok(),
                "Synthetic light sample"
            );
        }
    }
}
