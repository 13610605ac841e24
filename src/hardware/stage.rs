//! Motion tuning, ring buffer and hardware z-stack on the Tiger hub.
//!
//! Distances are in mm except where noted. Ring-buffer positions and the
//! z-stack step are sent in tenths of a micron, so both are scaled by 10
//! before transmission.

use tracing::{info, instrument};

use crate::codec::{format_float, AxisLabel, Codec};
use crate::error::{RigError, RigResult};

/// Servo power behaviour after a move (`MA {axis}=0..3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldingPowerMode(u8);

impl HoldingPowerMode {
    /// Mode 0 to 3.
    pub fn new(mode: u8) -> RigResult<Self> {
        if mode > 3 {
            return Err(RigError::invalid_parameter(
                "holding_power_mode",
                format!("must be 0-3, got {mode}"),
            ));
        }
        Ok(Self(mode))
    }

    /// Numeric code sent to the controller.
    pub fn code(self) -> u8 {
        self.0
    }
}

/// TTL trigger behaviour of the ring buffer (`RM T=1..3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferTtlMode(u8);

impl RingBufferTtlMode {
    /// Mode 1 to 3.
    pub fn new(mode: u8) -> RigResult<Self> {
        if !(1..=3).contains(&mode) {
            return Err(RigError::invalid_parameter(
                "ring_buffer_ttl_mode",
                format!("must be 1-3, got {mode}"),
            ));
        }
        Ok(Self(mode))
    }

    /// Numeric code sent to the controller.
    pub fn code(self) -> u8 {
        self.0
    }
}

/// Stage command module, bound to the hub.
#[derive(Clone)]
pub struct StageCommands {
    codec: Codec,
}

impl StageCommands {
    /// Bind to the hub codec.
    pub fn new(hub: Codec) -> Self {
        Self { codec: hub }
    }

    async fn send(&self, command: &str) -> RigResult<()> {
        self.codec.execute(command).await?;
        Ok(())
    }

    // --- Motion tuning ---

    /// Backlash compensation distance (mm).
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn set_backlash(&self, axis: &AxisLabel, distance_mm: f64) -> RigResult<()> {
        self.send(&format!("B {axis}={}", format_float(distance_mm)))
            .await
    }

    /// Overshoot distance (mm).
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn set_overshoot(&self, axis: &AxisLabel, distance_mm: f64) -> RigResult<()> {
        self.send(&format!("OS {axis}={}", format_float(distance_mm)))
            .await
    }

    /// Joystick fast and slow speeds, in percent.
    #[instrument(skip(self), err)]
    pub async fn set_joystick_speed(&self, fast_percent: f64, slow_percent: f64) -> RigResult<()> {
        self.send(&format!(
            "JSSPD F={} S={}",
            format_float(fast_percent),
            format_float(slow_percent)
        ))
        .await
    }

    /// Servo power after a move on `axis`.
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn set_holding_power(&self, axis: &AxisLabel, mode: HoldingPowerMode) -> RigResult<()> {
        self.send(&format!("MA {axis}={}", mode.code())).await
    }

    // --- Position and limits ---

    /// Define the current position of `axis` as zero.
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn zero_position(&self, axis: &AxisLabel) -> RigResult<()> {
        self.send(&format!("Z {axis}")).await
    }

    /// Software travel limits, low first.
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn set_travel_limits(&self, axis: &AxisLabel, low_mm: f64, high_mm: f64) -> RigResult<()> {
        if low_mm > high_mm {
            return Err(RigError::invalid_parameter(
                "travel_limits",
                format!("low {low_mm} is above high {high_mm}"),
            ));
        }
        self.send(&format!("SL {axis}={}", format_float(low_mm)))
            .await?;
        self.send(&format!("SH {axis}={}", format_float(high_mm)))
            .await
    }

    // --- Ring buffer ---

    /// Empty the ring buffer.
    #[instrument(skip(self), err)]
    pub async fn clear_ring_buffer(&self) -> RigResult<()> {
        self.send("RM X=0").await
    }

    /// Load one ring-buffer entry. Positions are in µm.
    ///
    /// `[(X, 2.5)]` is sent as `LD X=25.0`.
    #[instrument(skip(self), err)]
    pub async fn load_ring_buffer(&self, positions: &[(AxisLabel, f64)]) -> RigResult<()> {
        if positions.is_empty() {
            return Err(RigError::invalid_parameter(
                "positions",
                "at least one axis position is required",
            ));
        }
        let fields: Vec<String> = positions
            .iter()
            .map(|(axis, pos)| format!("{axis}={}", format_float(pos * 10.0)))
            .collect();
        self.send(&format!("LD {}", fields.join(" "))).await
    }

    /// How TTL pulses advance the ring buffer.
    #[instrument(skip(self), err)]
    pub async fn set_ring_buffer_ttl_mode(&self, mode: RingBufferTtlMode) -> RigResult<()> {
        self.send(&format!("RM T={}", mode.code())).await
    }

    /// Speed of ring-buffer moves (mm/s).
    #[instrument(skip(self), err)]
    pub async fn set_ring_buffer_speed(&self, speed_mm_s: f64) -> RigResult<()> {
        self.send(&format!("RBSPEED F={}", format_float(speed_mm_s)))
            .await
    }

    // --- Hardware z-stack ---

    /// Program a z-stack of `slices` steps of `step_um`.
    #[instrument(skip(self), err)]
    pub async fn setup_z_stack(&self, step_um: f64, slices: u32) -> RigResult<()> {
        self.send(&format!("ZS A={} Y={slices}", format_float(step_um * 10.0)))
            .await?;
        info!(step_um, slices, "Z-stack programmed");
        Ok(())
    }

    /// Start the armed z-stack.
    #[instrument(skip(self), err)]
    pub async fn start_z_stack(&self) -> RigResult<()> {
        self.send("ZS S=1").await
    }

    /// Stop the z-stack.
    #[instrument(skip(self), err)]
    pub async fn stop_z_stack(&self) -> RigResult<()> {
        self.send("ZS S=0").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeviceHandle, MockTransport};
    use std::sync::Arc;

    fn stage(mock: &Arc<MockTransport>) -> StageCommands {
        StageCommands::new(Codec::new(
            mock.clone(),
            DeviceHandle::new("TigerCommHub", "ASITiger"),
        ))
    }

    fn axis(name: &str) -> AxisLabel {
        AxisLabel::new(name).unwrap()
    }

    #[tokio::test]
    async fn z_stack_step_is_scaled_by_ten() {
        let mock = Arc::new(MockTransport::new());
        let stage = stage(&mock);

        stage.setup_z_stack(1.0, 10).await.unwrap();
        stage.start_z_stack().await.unwrap();
        stage.stop_z_stack().await.unwrap();

        assert_eq!(mock.calls(), vec!["ZS A=10.0 Y=10", "ZS S=1", "ZS S=0"]);
    }

    #[tokio::test]
    async fn ring_buffer_positions_are_scaled_by_ten() {
        let mock = Arc::new(MockTransport::new());
        let stage = stage(&mock);

        stage.load_ring_buffer(&[(axis("X"), 2.5)]).await.unwrap();
        stage
            .load_ring_buffer(&[(axis("X"), 1.0), (axis("Y"), -0.5)])
            .await
            .unwrap();

        assert_eq!(mock.calls(), vec!["LD X=25.0", "LD X=10.0 Y=-5.0"]);
        assert!(stage.load_ring_buffer(&[]).await.is_err());
    }

    #[tokio::test]
    async fn ring_buffer_control() {
        let mock = Arc::new(MockTransport::new());
        let stage = stage(&mock);

        stage.clear_ring_buffer().await.unwrap();
        stage
            .set_ring_buffer_ttl_mode(RingBufferTtlMode::new(2).unwrap())
            .await
            .unwrap();
        stage.set_ring_buffer_speed(0.5).await.unwrap();

        assert_eq!(mock.calls(), vec!["RM X=0", "RM T=2", "RBSPEED F=0.5"]);
        assert!(RingBufferTtlMode::new(0).is_err());
        assert!(RingBufferTtlMode::new(4).is_err());
    }

    #[tokio::test]
    async fn tuning_and_limits() {
        let mock = Arc::new(MockTransport::new());
        let stage = stage(&mock);

        stage.set_backlash(&axis("X"), 0.04).await.unwrap();
        stage.set_overshoot(&axis("X"), 0.01).await.unwrap();
        stage.set_joystick_speed(80.0, 10.0).await.unwrap();
        stage
            .set_holding_power(&axis("Z"), HoldingPowerMode::new(3).unwrap())
            .await
            .unwrap();
        stage.zero_position(&axis("Z")).await.unwrap();
        stage
            .set_travel_limits(&axis("Z"), -5.0, 5.0)
            .await
            .unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                "B X=0.04",
                "OS X=0.01",
                "JSSPD F=80.0 S=10.0",
                "MA Z=3",
                "Z Z",
                "SL Z=-5.0",
                "SH Z=5.0",
            ]
        );
        assert!(HoldingPowerMode::new(4).is_err());
    }

    #[tokio::test]
    async fn rejected_low_limit_stops_before_high() {
        let mock = Arc::new(MockTransport::new());
        mock.set_reply("SL Z=-500.0", ":N-4");
        let stage = stage(&mock);

        let result = stage.set_travel_limits(&axis("Z"), -500.0, 5.0).await;
        assert!(matches!(result, Err(RigError::DeviceCommand { .. })));
        assert_eq!(mock.calls(), vec!["SL Z=-500.0"]);
    }
}
