// Telemetry: derived dashboard values and the low-rate publisher
//
// The control loop derives a TelemetrySnapshot every tick and replaces the
// watch slot; the publisher wakes at its own cadence, copies whatever is newest
// and forwards it. Intermediate snapshots are dropped.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::drive::DriveMode;
use crate::messages::{DashboardMessage, MotorFeedback, RuntimeHealth, TelemetrySnapshot};

const INCHES_PER_MILE: f64 = 63_360.0;

/// Error types for telemetry delivery
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Publish timed out")]
    Timeout,
}

/// How motor eRPM maps to wheel RPM
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeedConversion {
    /// wheel rpm = erpm / divisor
    ErpmDivisor { divisor: f64, wheel_diameter_in: f64 },
    /// wheel rpm = erpm / pole_pairs / pulley_ratio
    Gearing {
        pole_pairs: f64,
        pulley_ratio: f64,
        wheel_diameter_in: f64,
    },
}

impl Default for SpeedConversion {
    fn default() -> Self {
        SpeedConversion::ErpmDivisor {
            divisor: 15.0,
            wheel_diameter_in: 8.0,
        }
    }
}

impl SpeedConversion {
    pub fn wheel_rpm(&self, erpm: f64) -> f64 {
        match *self {
            SpeedConversion::ErpmDivisor { divisor, .. } => erpm / divisor,
            SpeedConversion::Gearing {
                pole_pairs,
                pulley_ratio,
                ..
            } => erpm / pole_pairs / pulley_ratio,
        }
    }

    fn wheel_diameter_in(&self) -> f64 {
        match *self {
            SpeedConversion::ErpmDivisor {
                wheel_diameter_in, ..
            }
            | SpeedConversion::Gearing {
                wheel_diameter_in, ..
            } => wheel_diameter_in,
        }
    }

    pub fn mph(&self, erpm: f64) -> f64 {
        self.wheel_rpm(erpm) * std::f64::consts::PI * self.wheel_diameter_in() * 60.0
            / INCHES_PER_MILE
    }

    pub fn is_valid(&self) -> bool {
        let positive = |x: f64| x.is_finite() && x > 0.0;
        match *self {
            SpeedConversion::ErpmDivisor {
                divisor,
                wheel_diameter_in,
            } => positive(divisor) && positive(wheel_diameter_in),
            SpeedConversion::Gearing {
                pole_pairs,
                pulley_ratio,
                wheel_diameter_in,
            } => positive(pole_pairs) && positive(pulley_ratio) && positive(wheel_diameter_in),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VehicleConfig {
    pub speed_conversion: SpeedConversion,
    /// Pack voltage read as 0 %
    pub battery_empty_v: f64,
    /// Pack voltage read as 100 %
    pub battery_full_v: f64,
    /// Range on a full pack, miles
    pub full_range_miles: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        // 10S lithium-ion pack
        Self {
            speed_conversion: SpeedConversion::default(),
            battery_empty_v: 33.0,
            battery_full_v: 42.0,
            full_range_miles: 10.0,
        }
    }
}

impl VehicleConfig {
    pub fn battery_pct(&self, voltage: f64) -> f64 {
        let span = self.battery_full_v - self.battery_empty_v;
        if span <= 0.0 || !voltage.is_finite() {
            return 0.0;
        }
        ((voltage - self.battery_empty_v) / span * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub dashboard_topic: String,
    pub health_topic: String,
    pub publish_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            dashboard_topic: crate::config::TOPIC_DASHBOARD.to_string(),
            health_topic: crate::config::TOPIC_HEALTH.to_string(),
            publish_timeout_ms: 100,
        }
    }
}

/// Build the snapshot for one tick from both motors' feedback
pub fn derive_snapshot(
    left: &MotorFeedback,
    right: &MotorFeedback,
    mode: DriveMode,
    health: RuntimeHealth,
    vehicle: &VehicleConfig,
) -> TelemetrySnapshot {
    let average_erpm = (left.rpm + right.rpm) / 2.0;
    let bus_voltage = left.bus_voltage.max(right.bus_voltage);
    let battery_pct = vehicle.battery_pct(bus_voltage);

    TelemetrySnapshot {
        speed_mph: vehicle.speed_conversion.mph(average_erpm),
        power_watts: left.avg_current * left.bus_voltage + right.avg_current * right.bus_voltage,
        battery_pct,
        bus_voltage,
        fet_temp_c: left.fet_temp.max(right.fet_temp),
        range_miles: battery_pct / 100.0 * vehicle.full_range_miles,
        mode,
        health,
    }
}

/// Outward destination for dashboard records; delivery is best-effort
pub trait TelemetrySink: Send + 'static {
    fn publish(
        &mut self,
        message: DashboardMessage,
    ) -> impl Future<Output = Result<(), TelemetryError>> + Send;
}

/// Publishes the dashboard record and health flag as JSON over zenoh
pub struct ZenohSink {
    dashboard: zenoh::pubsub::Publisher<'static>,
    health: zenoh::pubsub::Publisher<'static>,
}

impl ZenohSink {
    pub async fn new(session: &zenoh::Session, config: &TelemetryConfig) -> zenoh::Result<Self> {
        let dashboard = session
            .declare_publisher(config.dashboard_topic.clone())
            .await?;
        let health = session.declare_publisher(config.health_topic.clone()).await?;
        info!(
            "Publishing to: {}, {}",
            config.dashboard_topic, config.health_topic
        );
        Ok(Self { dashboard, health })
    }
}

impl TelemetrySink for ZenohSink {
    async fn publish(&mut self, message: DashboardMessage) -> Result<(), TelemetryError> {
        let dashboard_json = serde_json::to_string(&message)?;
        self.dashboard
            .put(dashboard_json)
            .await
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;

        let health_json = serde_json::to_string(&message.health)?;
        self.health
            .put(health_json)
            .await
            .map_err(|e| TelemetryError::Transport(e.to_string()))
    }
}

/// Forwards snapshots to a sink, swallowing (and logging) delivery failures
pub struct TelemetryPublisher<S> {
    sink: S,
    publish_timeout: Duration,
    failing: bool,
}

impl<S: TelemetrySink> TelemetryPublisher<S> {
    pub fn new(sink: S, publish_timeout: Duration) -> Self {
        Self {
            sink,
            publish_timeout,
            failing: false,
        }
    }

    /// Forward one snapshot. Never fails.
    pub async fn publish(&mut self, snapshot: &TelemetrySnapshot) {
        let message = DashboardMessage::from(snapshot);
        let result = match timeout(self.publish_timeout, self.sink.publish(message)).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Timeout),
        };

        match result {
            Ok(()) => {
                if self.failing {
                    info!("Telemetry delivery recovered");
                    self.failing = false;
                }
            }
            Err(e) if self.failing => debug!("Telemetry delivery still failing: {}", e),
            Err(e) => {
                warn!("Telemetry delivery failed: {}", e);
                self.failing = true;
            }
        }
    }

    /// Publish the newest snapshot every `period` until `stop` turns true
    pub async fn run(
        mut self,
        snapshots: watch::Receiver<TelemetrySnapshot>,
        mut stop: watch::Receiver<bool>,
        period: Duration,
    ) {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tick.tick() => {}
            }
            // Copy out so the slot is never held across an await
            let snapshot = *snapshots.borrow();
            self.publish(&snapshot).await;
        }
        info!("Telemetry publisher stopped");
    }
}
