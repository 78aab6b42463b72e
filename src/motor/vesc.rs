// VESC UART protocol implementation
//
// Packet format:
//   short: [0x02, len:u8,     payload..., crc_hi, crc_lo, 0x03]
//   long:  [0x03, len:u16be,  payload..., crc_hi, crc_lo, 0x03]
// CRC is CRC-16/XMODEM over the payload. The first payload byte is the command id.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for VESC UART
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

const START_SHORT: u8 = 0x02;
const START_LONG: u8 = 0x03;
const STOP: u8 = 0x03;

/// Command ids used by the runtime
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    FwVersion = 0,
    GetValues = 4,
    SetCurrent = 6,
    SetRpm = 8,
}

/// Error types for VESC communication
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from {port}: {reason}")]
    InvalidResponse { port: String, reason: String },

    #[error("CRC mismatch in packet from {port}")]
    CrcMismatch { port: String },

    #[error("Timeout waiting for response from {port}")]
    Timeout { port: String },

    #[error("Motor controller on {port} is not connected")]
    NotConnected { port: String },
}

pub type Result<T> = std::result::Result<T, MotorError>;

/// Decoded COMM_GET_VALUES response (leading fields only)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Values {
    pub temp_fet: f64,
    pub temp_motor: f64,
    pub avg_motor_current: f64,
    pub avg_input_current: f64,
    pub avg_id: f64,
    pub avg_iq: f64,
    pub duty: f64,
    pub rpm: f64,
    pub v_in: f64,
}

/// CRC-16/XMODEM (poly 0x1021, init 0)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Wrap a payload in a short or long frame
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 6);
    if payload.len() <= 0xFF {
        packet.push(START_SHORT);
        packet.push(payload.len() as u8);
    } else {
        packet.push(START_LONG);
        packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    packet.extend_from_slice(payload);
    packet.extend_from_slice(&crc16(payload).to_be_bytes());
    packet.push(STOP);
    packet
}

fn invalid(port: &str, reason: impl Into<String>) -> MotorError {
    MotorError::InvalidResponse {
        port: port.to_string(),
        reason: reason.into(),
    }
}

/// Read one frame from `reader` and return its payload
pub fn read_frame<R: Read>(reader: &mut R, port: &str) -> Result<Vec<u8>> {
    let mut start = [0u8; 1];
    reader.read_exact(&mut start)?;

    let length = match start[0] {
        START_SHORT => {
            let mut len = [0u8; 1];
            reader.read_exact(&mut len)?;
            usize::from(len[0])
        }
        START_LONG => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            usize::from(u16::from_be_bytes(len))
        }
        other => return Err(invalid(port, format!("Invalid start byte: 0x{:02X}", other))),
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    let mut trailer = [0u8; 3];
    reader.read_exact(&mut trailer)?;
    if trailer[2] != STOP {
        return Err(invalid(port, format!("Invalid stop byte: 0x{:02X}", trailer[2])));
    }
    if u16::from_be_bytes([trailer[0], trailer[1]]) != crc16(&payload) {
        return Err(MotorError::CrcMismatch {
            port: port.to_string(),
        });
    }
    Ok(payload)
}

// Big-endian field reader over a response payload
struct PayloadReader<'a> {
    data: &'a [u8],
    port: &'a str,
}

impl<'a> PayloadReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.data.len() < N {
            return Err(invalid(self.port, "Truncated GET_VALUES payload"));
        }
        let (head, rest) = self.data.split_at(N);
        self.data = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn scaled_i16(&mut self, scale: f64) -> Result<f64> {
        Ok(f64::from(i16::from_be_bytes(self.take::<2>()?)) / scale)
    }

    fn scaled_i32(&mut self, scale: f64) -> Result<f64> {
        Ok(f64::from(i32::from_be_bytes(self.take::<4>()?)) / scale)
    }
}

/// Decode a GET_VALUES payload (command byte included)
pub fn decode_values(payload: &[u8], port: &str) -> Result<Values> {
    match payload.first() {
        Some(&id) if id == Command::GetValues as u8 => {}
        Some(&id) => return Err(invalid(port, format!("Unexpected command id {}", id))),
        None => return Err(invalid(port, "Empty response")),
    }
    let mut reader = PayloadReader {
        data: &payload[1..],
        port,
    };
    Ok(Values {
        temp_fet: reader.scaled_i16(10.0)?,
        temp_motor: reader.scaled_i16(10.0)?,
        avg_motor_current: reader.scaled_i32(100.0)?,
        avg_input_current: reader.scaled_i32(100.0)?,
        avg_id: reader.scaled_i32(100.0)?,
        avg_iq: reader.scaled_i32(100.0)?,
        duty: reader.scaled_i16(1000.0)?,
        rpm: reader.scaled_i32(1.0)?,
        v_in: reader.scaled_i16(10.0)?,
    })
}

fn command_payload(command: Command, value: i32) -> [u8; 5] {
    let bytes = value.to_be_bytes();
    [command as u8, bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// One VESC on its own serial port
pub struct VescBus {
    port: Box<dyn SerialPort>,
    name: String,
}

impl VescBus {
    /// Open a new connection to the controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }

    fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        let packet = encode_packet(payload);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.port, &self.name).map_err(|e| match e {
            MotorError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                MotorError::Timeout {
                    port: self.name.clone(),
                }
            }
            other => other,
        })
    }

    /// Check the controller answers a firmware version request
    pub fn ping(&mut self) -> Result<bool> {
        // Stale bytes from an earlier timeout would be read as the answer
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.send_payload(&[Command::FwVersion as u8])?;
        match self.read_response() {
            Ok(payload) => Ok(payload.first() == Some(&(Command::FwVersion as u8))),
            Err(MotorError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_values(&mut self) -> Result<Values> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.send_payload(&[Command::GetValues as u8])?;
        let payload = self.read_response()?;
        decode_values(&payload, &self.name)
    }

    /// Set speed in electrical RPM (no response)
    pub fn set_rpm(&mut self, erpm: f64) -> Result<()> {
        debug!("{}: set_rpm {:.0}", self.name, erpm);
        self.send_payload(&command_payload(Command::SetRpm, erpm.round() as i32))
    }

    /// Set motor current in amps; 0 releases the motor (no response)
    pub fn set_current(&mut self, amps: f64) -> Result<()> {
        debug!("{}: set_current {:.2}", self.name, amps);
        self.send_payload(&command_payload(
            Command::SetCurrent,
            (amps * 1000.0).round() as i32,
        ))
    }
}
