//! 按行分帧的JSON编解码器
//!
//! 每条消息以 `\n` 结尾，可能带 `\r`。一次读取可能包含半条消息，也可能包含多条。

use super::messages::JsonRpcMessage;
use crate::error::StratumError;
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// 单行最大长度
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct StratumCodec {
    max_length: usize,
    /// 已扫描过、确认不含换行符的前缀长度
    next_index: usize,
}

impl Default for StratumCodec {
    fn default() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE)
    }
}

impl StratumCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Decoder for StratumCodec {
    type Item = JsonRpcMessage;
    type Error = StratumError;

    /// 格式错误的一行会被整行消耗并返回 `Json` 错误。
    /// 注意 `Framed` 在解码错误后会结束流，需要继续读取时应直接调用本方法。
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = buf[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if buf.len() > self.max_length {
                    buf.clear();
                    self.next_index = 0;
                    return Err(StratumError::FrameTooLong {
                        max: self.max_length,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;
            let frame = buf.split_to(line_end + 1);

            if line_end > self.max_length {
                return Err(StratumError::FrameTooLong {
                    max: self.max_length,
                });
            }

            let mut line = &frame[..line_end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return serde_json::from_slice(line).map(Some).map_err(StratumError::from);
        }
    }
}

impl Encoder<JsonRpcMessage> for StratumCodec {
    type Error = StratumError;

    fn encode(&mut self, item: JsonRpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_line_waits_for_more() {
        let mut codec = StratumCodec::new();
        let mut buf = BytesMut::from(&br#"{"id":1,"result":tr"#[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ue,\"error\":null}\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.id(), Some(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_merged_lines_yield_each_message() {
        let mut codec = StratumCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"id\":null,\"method\":\"mining.set_difficulty\",\"params\":[8]}\r\n\n{\"id\":2,\"result\":true,\"error\":null}\n"[..],
        );

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.method(), Some("mining.set_difficulty"));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.id(), Some(2));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_consumed() {
        let mut codec = StratumCodec::new();
        let mut buf = BytesMut::from(&b"not json\n{\"id\":4,\"result\":true}\n"[..]);

        assert!(matches!(codec.decode(&mut buf), Err(StratumError::Json(_))));
        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.id(), Some(4));
    }

    #[test]
    fn test_overlong_line_rejected() {
        let mut codec = StratumCodec::with_max_length(16);
        let mut buf = BytesMut::from(&[b'a'; 32][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StratumError::FrameTooLong { max: 16 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = StratumCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                JsonRpcMessage::request(2, "mining.authorize", json!(["user", "x"])),
                &mut buf,
            )
            .unwrap();
        assert_eq!(
            &buf[..],
            &b"{\"id\":2,\"method\":\"mining.authorize\",\"params\":[\"user\",\"x\"]}\n"[..]
        );
    }
}
