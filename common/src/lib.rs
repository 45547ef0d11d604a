pub mod controller;

use core::fmt::{self, Write};
use thiserror::Error;

use crate::controller::{ActuatorCommand, HoeCommand, RcMode, TravelDirection, UpstreamMessage};

pub const BAUD_RATE_CTRL: u32 = 115_200;

pub const MSG_END: u8 = b'\n';

/// Sent by the host while probing a port
pub const IDENTIFY_REQUEST: &str = "whoami";
/// Prefix of the line the controller answers with
pub const IDENTIFY_RESPONSE: &str = "rowbot-controller";

/// Upper bound on one encoded `ActuatorCommand`
pub const MAX_COMMAND_LEN: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationError {
    #[error("message does not fit the output buffer")]
    BufferFull,
    #[error("actuator command outside of safe bounds")]
    OutOfBounds,
    #[error("received frame is not valid utf-8 text")]
    Malformed,
}

/// Fixed size output buffer that refuses to grow
struct Buffer<'a> {
    buffer: &'a mut [u8],
    index: usize,
}

impl<'a> Buffer<'a> {
    fn new(buffer: &'a mut [u8]) -> Self {
        Buffer { buffer, index: 0 }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), CommunicationError> {
        let end = self.index + bytes.len();
        if end > self.buffer.len() {
            return Err(CommunicationError::BufferFull);
        }

        self.buffer[self.index..end].copy_from_slice(bytes);
        self.index = end;

        Ok(())
    }

    fn into_buffer(self) -> &'a [u8] {
        &self.buffer[..self.index]
    }
}

impl Write for Buffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

/// Encodes a command as the newline separated text the microcontroller parses.
///
/// Out of bounds commands are refused rather than clamped, a caller producing
/// one has a bug.
pub fn write<'a>(command: &ActuatorCommand, buffer: &'a mut [u8]) -> Result<&'a [u8], CommunicationError> {
    if !command.in_bounds() {
        return Err(CommunicationError::OutOfBounds);
    }

    let mut out = Buffer::new(buffer);
    let hoe = match command.hoe {
        HoeCommand::Lower => "0",
        HoeCommand::Raise => "home",
    };

    write!(
        out,
        "drive {} {}\ngantry {}\nhoe {}\n",
        command.drive.left, command.drive.right, command.gantry.step_delay_us, hoe
    )
    .map_err(|_| CommunicationError::BufferFull)?;

    Ok(out.into_buffer())
}

pub fn write_identify_request(buffer: &mut [u8]) -> Result<&[u8], CommunicationError> {
    let mut out = Buffer::new(buffer);
    out.push(IDENTIFY_REQUEST.as_bytes())?;
    out.push(&[MSG_END])?;
    Ok(out.into_buffer())
}

pub fn end_of_frame(byte: &u8) -> bool {
    *byte == MSG_END
}

/// Decodes one received line, with or without its terminator
pub fn read(frame: &[u8]) -> Result<UpstreamMessage<'_>, CommunicationError> {
    let text = core::str::from_utf8(frame)
        .map_err(|_| CommunicationError::Malformed)?
        .trim();

    if text.starts_with(IDENTIFY_RESPONSE) {
        return Ok(UpstreamMessage::Identify(text));
    }

    match read_mode(text) {
        Some((mode, direction)) => Ok(UpstreamMessage::Mode { mode, direction, text }),
        None => Ok(UpstreamMessage::Log(text)),
    }
}

fn read_mode(text: &str) -> Option<(RcMode, Option<TravelDirection>)> {
    let mut words = text.split_whitespace();
    if words.next()? != "mode" {
        return None;
    }
    let mode = RcMode::from_code(words.next()?.parse().ok()?)?;

    let direction = words.find_map(|word| match word {
        "FORWARD" => Some(TravelDirection::Forward),
        "BACKWARD" => Some(TravelDirection::Reverse),
        _ => None,
    });
    Some((mode, direction))
}
