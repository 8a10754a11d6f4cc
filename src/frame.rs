use crate::error::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024; // 16MB

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            opcode,
            payload,
        }
    }

    pub fn text(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    pub fn close() -> Self {
        Self::new(true, OpCode::Close, Vec::new())
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame, Error> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    // The first bit of the first byte says whether this frame is the final
    // fragment of a message, the last 4 bits carry the opcode.
    let final_fragment = (header[0] & 0b10000000) != 0;
    let opcode = OpCode::from(header[0] & 0b00001111)?;

    // Control opcodes (ping, pong, close) must never be fragmented.
    if !final_fragment && opcode.is_control() {
        return Err(Error::ControlFramesFragmented);
    }

    // The first bit of the second byte is the mask bit, the remaining 7 bits
    // are the payload length, with 126/127 escaping to 16/64-bit lengths.
    let masked = (header[1] & 0b10000000) != 0;
    let mut length = (header[1] & 0b01111111) as usize;

    if length == 126 {
        let mut be_bytes = [0u8; 2];
        reader.read_exact(&mut be_bytes).await?;
        length = u16::from_be_bytes(be_bytes) as usize;
    } else if length == 127 {
        let mut be_bytes = [0u8; 8];
        reader.read_exact(&mut be_bytes).await?;
        length = u64::from_be_bytes(be_bytes) as usize;
    }

    if length > MAX_PAYLOAD_SIZE {
        return Err(Error::MaxFrameSize);
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    // Masked payloads are XOR'd byte-for-byte with the 4-byte key, applying
    // it again recovers the original data.
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        final_fragment,
        opcode,
        payload,
    })
}

// Frames written from the client side must carry a random mask, frames from
// the server side must not. The same length encoding applies to both.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    frame: Frame,
    masked: bool,
) -> Result<(), Error> {
    let first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
    let payload_len = frame.payload.len();
    let mask_bit = if masked { 0b1000_0000 } else { 0 };

    stream.write_all(&[first_byte]).await?;

    if payload_len <= 125 {
        stream.write_all(&[mask_bit | payload_len as u8]).await?;
    } else if payload_len <= 65535 {
        stream
            .write_all(&[mask_bit | 126, (payload_len >> 8) as u8, payload_len as u8])
            .await?;
    } else {
        let bytes = (payload_len as u64).to_be_bytes();
        stream
            .write_all(&[
                mask_bit | 127,
                bytes[0],
                bytes[1],
                bytes[2],
                bytes[3],
                bytes[4],
                bytes[5],
                bytes[6],
                bytes[7],
            ])
            .await?;
    }

    if masked {
        let mask: [u8; 4] = rand::random();
        stream.write_all(&mask).await?;

        let mut masked_payload: Vec<u8> = Vec::with_capacity(frame.payload.len());
        for (i, &byte) in frame.payload.iter().enumerate() {
            masked_payload.push(byte ^ mask[i % 4]);
        }
        stream.write_all(&masked_payload).await?;
    } else {
        stream.write_all(&frame.payload).await?;
    }

    stream.flush().await?;
    Ok(())
}
