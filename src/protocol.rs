//! Binary frame protocol.
//!
//! Every WebSocket message is one frame: byte 0 is the type, the rest is
//! type-specific payload. Multi-byte integers are big-endian.

use thiserror::Error;

pub const TYPE_STDIN: u8 = 0x01;
pub const TYPE_STDOUT: u8 = 0x02;
pub const TYPE_RESIZE: u8 = 0x04;
pub const TYPE_EXIT: u8 = 0x05;
pub const TYPE_FILE_START: u8 = 0x10;
pub const TYPE_FILE_CHUNK: u8 = 0x11;
pub const TYPE_FILE_ACK: u8 = 0x12;
pub const TYPE_WRITE_STATE: u8 = 0x20;
pub const TYPE_SESSIONS_CHANGE: u8 = 0x21;
pub const TYPE_RESIZE_NOTIFY: u8 = 0x22;
pub const TYPE_CLIENT_COUNT: u8 = 0x23;

/// File-transfer acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Progress,
    Error,
}

impl AckStatus {
    fn to_byte(self) -> u8 {
        match self {
            AckStatus::Success => 0x00,
            AckStatus::Progress => 0x01,
            AckStatus::Error => 0x02,
        }
    }

    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x00 => Ok(AckStatus::Success),
            0x01 => Ok(AckStatus::Progress),
            0x02 => Ok(AckStatus::Error),
            other => Err(FrameError::BadValue("ack status", other)),
        }
    }
}

/// One protocol frame, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stdin(Vec<u8>),
    Stdout(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Exit { code: u32 },
    FileStart { size: u32, name: String },
    FileChunk { offset: u32, data: Vec<u8> },
    FileAck { status: AckStatus, message: String },
    WriteState { writer: bool },
    SessionsChange,
    ResizeNotify { cols: u16, rows: u16 },
    ClientCount { count: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),
    #[error("truncated {0} frame")]
    Truncated(&'static str),
    #[error("invalid {0} value 0x{1:02x}")]
    BadValue(&'static str, u8),
    #[error("frame field is not valid UTF-8")]
    BadUtf8,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Stdin(data) => with_type(TYPE_STDIN, data.len(), |out| {
                out.extend_from_slice(data);
            }),
            Frame::Stdout(data) => with_type(TYPE_STDOUT, data.len(), |out| {
                out.extend_from_slice(data);
            }),
            Frame::Resize { cols, rows } => with_type(TYPE_RESIZE, 4, |out| {
                put_u16(out, *cols);
                put_u16(out, *rows);
            }),
            Frame::Exit { code } => with_type(TYPE_EXIT, 4, |out| {
                put_u32(out, *code);
            }),
            Frame::FileStart { size, name } => {
                with_type(TYPE_FILE_START, 6 + name.len(), |out| {
                    put_u32(out, *size);
                    put_u16(out, name.len() as u16);
                    out.extend_from_slice(name.as_bytes());
                })
            }
            Frame::FileChunk { offset, data } => {
                with_type(TYPE_FILE_CHUNK, 4 + data.len(), |out| {
                    put_u32(out, *offset);
                    out.extend_from_slice(data);
                })
            }
            Frame::FileAck { status, message } => {
                with_type(TYPE_FILE_ACK, 1 + message.len(), |out| {
                    out.push(status.to_byte());
                    out.extend_from_slice(message.as_bytes());
                })
            }
            Frame::WriteState { writer } => with_type(TYPE_WRITE_STATE, 1, |out| {
                out.push(u8::from(*writer));
            }),
            Frame::SessionsChange => with_type(TYPE_SESSIONS_CHANGE, 0, |_| {}),
            Frame::ResizeNotify { cols, rows } => with_type(TYPE_RESIZE_NOTIFY, 4, |out| {
                put_u16(out, *cols);
                put_u16(out, *rows);
            }),
            Frame::ClientCount { count } => with_type(TYPE_CLIENT_COUNT, 2, |out| {
                put_u16(out, *count);
            }),
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
        let (&ty, payload) = raw.split_first().ok_or(FrameError::Empty)?;
        match ty {
            TYPE_STDIN => Ok(Frame::Stdin(payload.to_vec())),
            TYPE_STDOUT => Ok(Frame::Stdout(payload.to_vec())),
            TYPE_RESIZE => {
                if payload.len() != 4 {
                    return Err(FrameError::Truncated("RESIZE"));
                }
                Ok(Frame::Resize {
                    cols: get_u16(&payload[0..2]),
                    rows: get_u16(&payload[2..4]),
                })
            }
            TYPE_EXIT => {
                if payload.len() != 4 {
                    return Err(FrameError::Truncated("EXIT"));
                }
                Ok(Frame::Exit {
                    code: get_u32(&payload[0..4]),
                })
            }
            TYPE_FILE_START => {
                if payload.len() < 6 {
                    return Err(FrameError::Truncated("FILE_START"));
                }
                let size = get_u32(&payload[0..4]);
                let name_len = get_u16(&payload[4..6]) as usize;
                if payload.len() != 6 + name_len {
                    return Err(FrameError::Truncated("FILE_START"));
                }
                let name = std::str::from_utf8(&payload[6..])
                    .map_err(|_| FrameError::BadUtf8)?
                    .to_string();
                Ok(Frame::FileStart { size, name })
            }
            TYPE_FILE_CHUNK => {
                if payload.len() < 4 {
                    return Err(FrameError::Truncated("FILE_CHUNK"));
                }
                Ok(Frame::FileChunk {
                    offset: get_u32(&payload[0..4]),
                    data: payload[4..].to_vec(),
                })
            }
            TYPE_FILE_ACK => {
                let (&status, rest) = payload
                    .split_first()
                    .ok_or(FrameError::Truncated("FILE_ACK"))?;
                Ok(Frame::FileAck {
                    status: AckStatus::from_byte(status)?,
                    message: std::str::from_utf8(rest)
                        .map_err(|_| FrameError::BadUtf8)?
                        .to_string(),
                })
            }
            TYPE_WRITE_STATE => {
                if payload.len() != 1 {
                    return Err(FrameError::Truncated("WRITE_STATE"));
                }
                Ok(Frame::WriteState {
                    writer: payload[0] != 0,
                })
            }
            TYPE_SESSIONS_CHANGE => Ok(Frame::SessionsChange),
            TYPE_RESIZE_NOTIFY => {
                if payload.len() != 4 {
                    return Err(FrameError::Truncated("RESIZE_NOTIFY"));
                }
                Ok(Frame::ResizeNotify {
                    cols: get_u16(&payload[0..2]),
                    rows: get_u16(&payload[2..4]),
                })
            }
            TYPE_CLIENT_COUNT => {
                if payload.len() != 2 {
                    return Err(FrameError::Truncated("CLIENT_COUNT"));
                }
                Ok(Frame::ClientCount {
                    count: get_u16(&payload[0..2]),
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

fn with_type(ty: u8, payload_hint: usize, fill: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload_hint);
    out.push(ty);
    fill(&mut out);
    out
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn get_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn get_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let encoded = frame.encode();
        assert_eq!(Frame::decode(&encoded), Ok(frame));
    }

    #[test]
    fn roundtrips_every_type() {
        roundtrip(Frame::Stdin(b"ls -la\n".to_vec()));
        roundtrip(Frame::Stdout(b"\x1b[2Jtotal 0\r\n".to_vec()));
        roundtrip(Frame::Resize {
            cols: 120,
            rows: 40,
        });
        roundtrip(Frame::Exit { code: 0 });
        roundtrip(Frame::Exit { code: u32::MAX });
        roundtrip(Frame::FileStart {
            size: 10,
            name: "hi.txt".to_string(),
        });
        roundtrip(Frame::FileChunk {
            offset: 512,
            data: vec![0xff; 32],
        });
        roundtrip(Frame::FileAck {
            status: AckStatus::Success,
            message: "hi.txt".to_string(),
        });
        roundtrip(Frame::FileAck {
            status: AckStatus::Progress,
            message: String::new(),
        });
        roundtrip(Frame::WriteState { writer: true });
        roundtrip(Frame::SessionsChange);
        roundtrip(Frame::ResizeNotify { cols: 80, rows: 24 });
        roundtrip(Frame::ClientCount { count: 3 });
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let encoded = Frame::Resize {
            cols: 0x0102,
            rows: 0x0304,
        }
        .encode();
        assert_eq!(encoded, vec![0x04, 0x01, 0x02, 0x03, 0x04]);

        let encoded = Frame::FileStart {
            size: 7,
            name: "a".to_string(),
        }
        .encode();
        assert_eq!(encoded, vec![0x10, 0, 0, 0, 7, 0, 1, b'a']);
    }

    #[test]
    fn hidden_tab_resize_is_zero_zero() {
        let encoded = Frame::Resize { cols: 0, rows: 0 }.encode();
        assert_eq!(
            Frame::decode(&encoded),
            Ok(Frame::Resize { cols: 0, rows: 0 })
        );
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert_eq!(Frame::decode(&[]), Err(FrameError::Empty));
        assert_eq!(Frame::decode(&[0x7f, 1, 2]), Err(FrameError::UnknownType(0x7f)));
    }

    #[test]
    fn rejects_truncated_payloads() {
        assert_eq!(
            Frame::decode(&[TYPE_RESIZE, 0, 80]),
            Err(FrameError::Truncated("RESIZE"))
        );
        assert_eq!(
            Frame::decode(&[TYPE_EXIT, 0]),
            Err(FrameError::Truncated("EXIT"))
        );
        // FILE_START whose declared name length overruns the payload.
        assert_eq!(
            Frame::decode(&[TYPE_FILE_START, 0, 0, 0, 1, 0, 5, b'x']),
            Err(FrameError::Truncated("FILE_START"))
        );
        assert_eq!(
            Frame::decode(&[TYPE_FILE_ACK]),
            Err(FrameError::Truncated("FILE_ACK"))
        );
    }

    #[test]
    fn rejects_bad_ack_status() {
        assert_eq!(
            Frame::decode(&[TYPE_FILE_ACK, 0x09]),
            Err(FrameError::BadValue("ack status", 0x09))
        );
    }

    #[test]
    fn rejects_non_utf8_filename() {
        assert_eq!(
            Frame::decode(&[TYPE_FILE_START, 0, 0, 0, 1, 0, 2, 0xc3, 0x28]),
            Err(FrameError::BadUtf8)
        );
    }
}
