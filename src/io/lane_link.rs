//! Serial link to the lane I/O board
//!
//! One board per lane carries the three presence inputs and the barrier
//! servo output. Protocol:
//! - Baud: 19200, 8N1
//! - Command frame: 8 bytes, starts with 0x7E
//! - Response frame: 10 bytes, starts with 0x7F
//! - Checksum: sum all bytes, bitwise NOT

use crate::infra::config::LaneSettings;
use crate::io::hal::{PresenceInputs, ServoDrive};
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

// Protocol constants
const START_BYTE_COMMAND: u8 = 0x7E;
const START_BYTE_RESPONSE: u8 = 0x7F;
const CMD_QUERY_SENSORS: u8 = 0x10;
const CMD_SET_DUTY: u8 = 0x21;
const COMMAND_FRAME_LEN: usize = 8;
const RESPONSE_FRAME_LEN: usize = 10;

// Response status codes
const STATUS_OK: u8 = 0x00;

// Sensor bitmask positions in the query response
const BIT_BEFORE_BAR: u8 = 0x01;
const BIT_UNDER_BAR: u8 = 0x02;
const BIT_BEHIND_BAR: u8 = 0x04;

/// Maximum read attempts before giving up (prevents infinite loop)
const MAX_READ_ATTEMPTS: usize = 50;

/// Fully-raised arm angle; the calibration maps [0, 90] onto
/// [min_duty_us, max_duty_us] linearly
const MAX_ANGLE_DEGREES: u16 = 90;

/// Linear angle-to-pulse-width calibration
fn angle_to_duty_us(degrees: u8, min_duty_us: u16, max_duty_us: u16) -> u16 {
    let degrees = u16::from(degrees).min(MAX_ANGLE_DEGREES);
    let span = max_duty_us.saturating_sub(min_duty_us) as u32;
    min_duty_us + (span * u32::from(degrees) / u32::from(MAX_ANGLE_DEGREES)) as u16
}

/// Serial port plus its persistent read buffer. Responses can arrive in
/// chunks, so partial data is kept for the next read.
struct LinkInner {
    port: tokio_serial::SerialStream,
    read_buffer: Vec<u8>,
}

/// Serial-attached lane I/O board
///
/// Dropping the link closes the serial port; the board's watchdog then
/// parks the arm, so hardware release is tied to this handle's lifetime.
pub struct LaneLink {
    device: String,
    board_addr: u8,
    min_duty_us: u16,
    max_duty_us: u16,
    inner: tokio::sync::Mutex<LinkInner>,
}

impl LaneLink {
    /// Open the serial device for a lane
    pub fn open(lane: &LaneSettings, min_duty_us: u16, max_duty_us: u16) -> anyhow::Result<Self> {
        let port = tokio_serial::new(&lane.device, lane.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open lane device {}", lane.device))?;

        info!(device = %lane.device, baud = %lane.baud, board_addr = %lane.board_addr, "lane_link_opened");

        Ok(Self {
            device: lane.device.clone(),
            board_addr: lane.board_addr,
            min_duty_us,
            max_duty_us,
            inner: tokio::sync::Mutex::new(LinkInner {
                port,
                read_buffer: Vec::with_capacity(64),
            }),
        })
    }

    /// Build a command frame (8 bytes)
    fn build_command(&self, cmd: u8, data: [u8; 3]) -> [u8; COMMAND_FRAME_LEN] {
        let mut frame = [0u8; COMMAND_FRAME_LEN];
        frame[0] = START_BYTE_COMMAND;
        frame[1] = 0x00; // Undefined
        frame[2] = self.board_addr;
        frame[3] = cmd;
        frame[4] = data[0];
        frame[5] = data[1];
        frame[6] = data[2];

        // Checksum: sum all bytes, bitwise NOT
        let sum: u8 = frame[..7].iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
        frame[7] = !sum;

        frame
    }

    /// Validate a response frame and return (status, sensor bitmask)
    fn parse_response(&self, data: &[u8]) -> anyhow::Result<(u8, u8)> {
        if data.len() != RESPONSE_FRAME_LEN {
            bail!("invalid response length {} (expected {})", data.len(), RESPONSE_FRAME_LEN);
        }
        if data[0] != START_BYTE_RESPONSE {
            bail!("invalid start byte 0x{:02X}", data[0]);
        }

        // Validate checksum: sum all bytes (including checksum), add 1, should be 0
        let sum: u8 = data.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
        if sum.wrapping_add(1) != 0 {
            let hex_dump: String =
                data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ");
            bail!("checksum failed, raw bytes: {}", hex_dump);
        }

        let status = data[3];
        let sensors = data[4];
        let supply_voltage = data[8];

        trace!(
            status = status,
            sensors = format!("{:03b}", sensors),
            voltage = supply_voltage,
            "lane_link_response_parsed"
        );

        Ok((status, sensors))
    }

    /// Synchronize the read buffer to start with the response start byte,
    /// discarding any bytes before it.
    fn synchronize_buffer(inner: &mut LinkInner) {
        if inner.read_buffer.is_empty() || inner.read_buffer[0] == START_BYTE_RESPONSE {
            return;
        }

        if let Some(start_idx) =
            inner.read_buffer.iter().position(|&b| b == START_BYTE_RESPONSE)
        {
            if start_idx > 0 {
                debug!(discarded = start_idx, "lane_link_sync_discarded_bytes");
                inner.read_buffer.drain(..start_idx);
            }
        } else {
            if !inner.read_buffer.is_empty() {
                debug!(discarded = inner.read_buffer.len(), "lane_link_sync_no_start_byte");
                inner.read_buffer.clear();
            }
        }
    }

    /// Read one complete response frame into the persistent buffer
    async fn read_frame(inner: &mut LinkInner) -> anyhow::Result<Vec<u8>> {
        Self::synchronize_buffer(inner);

        let mut temp_buf = [0u8; 64];
        let mut attempts = 0;

        while inner.read_buffer.len() < RESPONSE_FRAME_LEN {
            attempts += 1;
            if attempts > MAX_READ_ATTEMPTS {
                bail!(
                    "no complete frame after {} read attempts ({} bytes buffered)",
                    MAX_READ_ATTEMPTS,
                    inner.read_buffer.len()
                );
            }

            match tokio::time::timeout(Duration::from_millis(50), inner.port.read(&mut temp_buf))
                .await
            {
                Ok(Ok(n)) if n > 0 => {
                    inner.read_buffer.extend_from_slice(&temp_buf[..n]);
                    Self::synchronize_buffer(inner);
                }
                Ok(Ok(_)) => {
                    // Zero bytes read, keep trying
                }
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => {
                    // Port-level timeout, keep trying
                }
                Ok(Err(e)) => return Err(e).context("lane link read error"),
                Err(_) => {
                    // tokio timeout elapsed, keep trying
                }
            }
        }

        let frame: Vec<u8> = inner.read_buffer.drain(..RESPONSE_FRAME_LEN).collect();
        if !inner.read_buffer.is_empty() {
            trace!(leftover = inner.read_buffer.len(), "lane_link_frame_leftover_bytes");
        }
        Ok(frame)
    }

    /// One command/response round trip on the board
    async fn transact(&self, cmd: u8, data: [u8; 3]) -> anyhow::Result<(u8, u8)> {
        let frame = self.build_command(cmd, data);
        let mut inner = self.inner.lock().await;

        inner.port.write_all(&frame).await.context("lane link write error")?;
        let response = Self::read_frame(&mut inner).await?;
        drop(inner);

        let (status, sensors) = self.parse_response(&response)?;
        if status != STATUS_OK {
            warn!(device = %self.device, cmd = cmd, status = status, "lane_link_board_status");
            bail!("board reported status 0x{:02X} for command 0x{:02X}", status, cmd);
        }
        Ok((status, sensors))
    }
}

#[async_trait]
impl PresenceInputs for LaneLink {
    async fn sample(&self) -> anyhow::Result<[bool; 3]> {
        let (_, sensors) = self.transact(CMD_QUERY_SENSORS, [0, 0, 0]).await?;
        Ok([
            sensors & BIT_BEFORE_BAR != 0,
            sensors & BIT_UNDER_BAR != 0,
            sensors & BIT_BEHIND_BAR != 0,
        ])
    }
}

#[async_trait]
impl ServoDrive for LaneLink {
    async fn set_angle(&self, degrees: u8) -> anyhow::Result<()> {
        let duty = angle_to_duty_us(degrees, self.min_duty_us, self.max_duty_us);
        let duty_bytes = duty.to_be_bytes();
        self.transact(CMD_SET_DUTY, [duty_bytes[0], duty_bytes[1], 0]).await?;
        trace!(device = %self.device, degrees = degrees, duty_us = duty, "lane_link_servo_driven");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_to_duty_linear() {
        assert_eq!(angle_to_duty_us(0, 500, 2500), 500);
        assert_eq!(angle_to_duty_us(90, 500, 2500), 2500);
        assert_eq!(angle_to_duty_us(45, 500, 2500), 1500);
        assert_eq!(angle_to_duty_us(30, 500, 2500), 1166);
    }

    #[test]
    fn test_angle_to_duty_clamps_overrange() {
        assert_eq!(angle_to_duty_us(120, 500, 2500), 2500);
    }

    #[test]
    fn test_angle_to_duty_degenerate_calibration() {
        // min == max must not underflow
        assert_eq!(angle_to_duty_us(45, 1500, 1500), 1500);
    }

    #[test]
    fn test_command_frame_checksum() {
        // Build a frame by hand the way the board firmware validates it
        let mut frame = [0u8; COMMAND_FRAME_LEN];
        frame[0] = START_BYTE_COMMAND;
        frame[2] = 1;
        frame[3] = CMD_QUERY_SENSORS;
        let sum: u8 = frame[..7].iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
        frame[7] = !sum;

        let total: u8 = frame.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
        assert_eq!(total.wrapping_add(1), 0);
    }
}
