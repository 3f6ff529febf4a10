// Copyright 2024 the Beauty authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::Error;
use crate::ws_types::OpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsParseResult {
  /// Need more data.
  Indeterminate,
  /// Text or binary data frame completed.
  DataFrame,
  /// Close frame received; the connection should close.
  CloseFrame,
  /// Ping frame received; the connection should send a pong.
  PingFrame,
  /// Pong frame received; the connection can update its ping status.
  PongFrame,
  /// Fragmented message received; not supported.
  FragmentationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Start,
  MaskAndLen,
  ExtLength,
  Mask1,
  Mask2,
  Mask3,
  Mask4,
  Payload,
}

/// Incremental parser for a single WebSocket frame.
///
/// Masked payloads are XOR-unmasked in place into the front of the same
/// buffer the frame arrived in, so after a terminal result
/// `content[..payload_read()]` holds exactly the payload. A frame may span
/// several buffer refills; the caller keeps the unmasked prefix and appends
/// new bytes behind it.
///
/// The server side always expects MASK=1 per RFC 6455 and clients never
/// mask, but the parser accepts both.
pub struct WsParser {
  state: State,
  fin: bool,
  opcode: OpCode,
  payload_len: usize,
  has_mask: bool,
  ext_len_bytes: usize,
  mask: [u8; 4],
  out_counter: usize,
  max_payload_size: usize,
}

impl WsParser {
  pub fn new(max_payload_size: usize) -> Self {
    Self {
      state: State::Start,
      fin: false,
      opcode: OpCode::Continuation,
      payload_len: 0,
      has_mask: false,
      ext_len_bytes: 0,
      mask: [0; 4],
      out_counter: 0,
      max_payload_size,
    }
  }

  /// Reset to the initial state, ready for the next frame.
  pub fn reset(&mut self) {
    self.state = State::Start;
    self.payload_len = 0;
    self.out_counter = 0;
  }

  pub fn opcode(&self) -> OpCode {
    self.opcode
  }

  pub fn is_final(&self) -> bool {
    self.fin
  }

  /// Declared payload length of the current frame.
  pub fn payload_len(&self) -> usize {
    self.payload_len
  }

  /// Unmasked payload bytes accumulated so far, always at
  /// `content[..payload_read()]`.
  pub fn payload_read(&self) -> usize {
    self.out_counter
  }

  /// Consume `content[start..]`. Returns the parse result and the index one
  /// past the last consumed byte; bytes after it belong to the next frame.
  pub fn parse(
    &mut self,
    content: &mut Vec<u8>,
    start: usize,
  ) -> Result<(WsParseResult, usize), Error> {
    let mut i = start;
    while i < content.len() {
      let input = content[i];
      i += 1;
      match self.state {
        State::Start => {
          self.fin = input & 0x80 != 0;
          self.opcode = OpCode::try_from(input & 0x0f)?;
          self.payload_len = 0;
          self.out_counter = 0;
          self.has_mask = false;
          self.mask = [0; 4];
          self.state = State::MaskAndLen;
        }
        State::MaskAndLen => {
          self.has_mask = input & 0x80 != 0;
          match input & 0x7f {
            126 => {
              self.ext_len_bytes = 2;
              self.state = State::ExtLength;
            }
            127 => {
              self.ext_len_bytes = 8;
              self.state = State::ExtLength;
            }
            len => {
              self.payload_len = usize::from(len);
              if let Some(result) = self.after_length()? {
                return Ok((result, i));
              }
            }
          }
        }
        State::ExtLength => {
          self.payload_len = (self.payload_len << 8) | usize::from(input);
          self.ext_len_bytes -= 1;
          if self.ext_len_bytes == 0 {
            if let Some(result) = self.after_length()? {
              return Ok((result, i));
            }
          }
        }
        State::Mask1 => {
          self.mask[0] = input;
          self.state = State::Mask2;
        }
        State::Mask2 => {
          self.mask[1] = input;
          self.state = State::Mask3;
        }
        State::Mask3 => {
          self.mask[2] = input;
          self.state = State::Mask4;
        }
        State::Mask4 => {
          self.mask[3] = input;
          if let Some(result) = self.begin_payload()? {
            return Ok((result, i));
          }
        }
        State::Payload => {
          content[self.out_counter] = input ^ self.mask[self.out_counter % 4];
          self.out_counter += 1;
          if self.out_counter == self.payload_len {
            return Ok((self.frame_result(), i));
          }
        }
      }
    }
    Ok((WsParseResult::Indeterminate, i))
  }

  fn after_length(&mut self) -> Result<Option<WsParseResult>, Error> {
    if self.has_mask {
      self.state = State::Mask1;
      return Ok(None);
    }
    self.begin_payload()
  }

  fn begin_payload(&mut self) -> Result<Option<WsParseResult>, Error> {
    if !self.fin || self.opcode == OpCode::Continuation {
      return Ok(Some(WsParseResult::FragmentationError));
    }
    if self.payload_len > self.max_payload_size {
      return Err(Error::FrameTooLarge);
    }
    if self.payload_len == 0 {
      return Ok(Some(self.frame_result()));
    }
    self.state = State::Payload;
    Ok(None)
  }

  fn frame_result(&self) -> WsParseResult {
    match self.opcode {
      OpCode::Close => WsParseResult::CloseFrame,
      OpCode::Ping => WsParseResult::PingFrame,
      OpCode::Pong => WsParseResult::PongFrame,
      _ => WsParseResult::DataFrame,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse_all(bytes: &[u8], max: usize) -> (WsParseResult, Vec<u8>, WsParser) {
    let mut parser = WsParser::new(max);
    let mut content = bytes.to_vec();
    let (result, _) = parser.parse(&mut content, 0).expect("parse failed");
    content.truncate(parser.payload_read());
    (result, content, parser)
  }

  #[test]
  fn empty_content_is_indeterminate() {
    let mut parser = WsParser::new(1024);
    let mut content = Vec::new();
    let (result, consumed) = parser.parse(&mut content, 0).unwrap();
    assert_eq!(result, WsParseResult::Indeterminate);
    assert_eq!(consumed, 0);
  }

  #[test]
  fn parses_masked_text_frame() {
    let bytes: Vec<u8> = vec![
      0x81, 0x8c, 0x91, 0x3d, 0x43, 0x45, 0xd9, 0x58, 0x2f, 0x29, 0xfe, 0x1d,
      0x14, 0x2a, 0xe3, 0x51, 0x27, 0x64,
    ];
    let (result, payload, parser) = parse_all(&bytes, 1024);
    assert_eq!(result, WsParseResult::DataFrame);
    assert_eq!(parser.opcode(), OpCode::Text);
    assert!(parser.is_final());
    assert_eq!(payload, b"Hello World!");
  }

  #[test]
  fn parses_rfc_sample_hello() {
    // single-frame masked "Hello" from RFC 6455 §5.7
    let bytes: Vec<u8> = vec![
      0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
    ];
    let (result, payload, _) = parse_all(&bytes, 1024);
    assert_eq!(result, WsParseResult::DataFrame);
    assert_eq!(payload, b"Hello");
  }

  #[test]
  fn parses_unmasked_frame() {
    let mut bytes = vec![0x82, 0x03];
    bytes.extend_from_slice(&[1, 2, 3]);
    let (result, payload, parser) = parse_all(&bytes, 1024);
    assert_eq!(result, WsParseResult::DataFrame);
    assert_eq!(parser.opcode(), OpCode::Binary);
    assert_eq!(payload, &[1, 2, 3]);
  }

  #[test]
  fn parses_sixteen_bit_length() {
    let payload: Vec<u8> = (0..200u8).map(|b| b ^ 0x5a).collect();
    let mut bytes = vec![0x82, 126, 0, 200];
    bytes.extend_from_slice(&payload);
    let (result, parsed, _) = parse_all(&bytes, 1024);
    assert_eq!(result, WsParseResult::DataFrame);
    assert_eq!(parsed, payload);
  }

  #[test]
  fn parses_control_frames() {
    let (result, payload, _) = parse_all(&[0x89, 0x02, b'h', b'i'], 1024);
    assert_eq!(result, WsParseResult::PingFrame);
    assert_eq!(payload, b"hi");

    let (result, payload, _) = parse_all(&[0x8a, 0x00], 1024);
    assert_eq!(result, WsParseResult::PongFrame);
    assert!(payload.is_empty());

    let (result, payload, _) = parse_all(&[0x88, 0x02, 0x03, 0xe8], 1024);
    assert_eq!(result, WsParseResult::CloseFrame);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1000);
  }

  #[test]
  fn rejects_fragmented_frames() {
    // FIN=0 text frame
    let (result, _, _) = parse_all(&[0x01, 0x01, b'x'], 1024);
    assert_eq!(result, WsParseResult::FragmentationError);

    // continuation frame
    let (result, _, _) = parse_all(&[0x80, 0x01, b'x'], 1024);
    assert_eq!(result, WsParseResult::FragmentationError);
  }

  #[test]
  fn rejects_oversized_frames() {
    let mut parser = WsParser::new(16);
    let mut content = vec![0x81, 0x7f, 0, 0, 0, 0, 0, 0, 0, 17];
    let err = parser.parse(&mut content, 0).unwrap_err();
    assert!(matches!(err, Error::FrameTooLarge));
  }

  #[test]
  fn rejects_unknown_opcode() {
    let mut parser = WsParser::new(1024);
    let mut content = vec![0x83, 0x00];
    let err = parser.parse(&mut content, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidOpCode(0x3)));
  }

  // A frame split at any point must reassemble to the same payload, with
  // the unmasked prefix carried in the same buffer.
  #[test]
  fn frame_split_across_reads_reassembles() {
    let frame: Vec<u8> = vec![
      0x81, 0x8c, 0x91, 0x3d, 0x43, 0x45, 0xd9, 0x58, 0x2f, 0x29, 0xfe, 0x1d,
      0x14, 0x2a, 0xe3, 0x51, 0x27, 0x64,
    ];

    for split in 1..frame.len() {
      let mut parser = WsParser::new(1024);
      let mut buf: Vec<u8> = Vec::new();

      buf.extend_from_slice(&frame[..split]);
      let (result, _) = parser.parse(&mut buf, 0).unwrap();
      assert_eq!(result, WsParseResult::Indeterminate, "split at {}", split);
      buf.truncate(parser.payload_read());

      let filled = buf.len();
      buf.extend_from_slice(&frame[split..]);
      let (result, _) = parser.parse(&mut buf, filled).unwrap();
      assert_eq!(result, WsParseResult::DataFrame, "split at {}", split);
      buf.truncate(parser.payload_read());
      assert_eq!(buf, b"Hello World!", "split at {}", split);
    }
  }

  #[test]
  fn consumed_index_leaves_next_frame_intact() {
    // two pings back to back in one buffer
    let mut content = vec![0x89, 0x01, b'a', 0x89, 0x01, b'b'];
    let mut parser = WsParser::new(1024);

    let (result, consumed) = parser.parse(&mut content, 0).unwrap();
    assert_eq!(result, WsParseResult::PingFrame);
    assert_eq!(consumed, 3);
    assert_eq!(&content[..parser.payload_read()], b"a");

    let len = content.len();
    content.copy_within(consumed.., 0);
    content.truncate(len - consumed);
    parser.reset();

    let (result, _) = parser.parse(&mut content, 0).unwrap();
    assert_eq!(result, WsParseResult::PingFrame);
    assert_eq!(&content[..parser.payload_read()], b"b");
  }
}
