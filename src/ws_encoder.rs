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

use bytes::{BufMut, BytesMut};

use crate::random::{DefaultRandom, RandomSource};
use crate::ws_types::OpCode;

/// Masking role of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// Server-to-client frames carry no mask.
  Server,
  /// Client-to-server frames must be masked.
  Client,
}

/// Builder for outgoing WebSocket frames.
///
/// Frames are assembled into a caller-provided buffer, which is cleared
/// first; on embedded targets that buffer is the connection's bounded send
/// buffer. In the `Client` role the 4-byte mask key is drawn from the
/// injected [`RandomSource`], which keeps frames deterministic under test
/// and lets firmware use a hardware generator.
pub struct WsEncoder {
  role: Role,
  random: Box<dyn RandomSource>,
}

impl WsEncoder {
  /// Server encoder; no masking, no random generator needed.
  pub fn server() -> Self {
    Self {
      role: Role::Server,
      random: Box::new(DefaultRandom),
    }
  }

  /// Client encoder; masking required, mask keys come from `random`.
  pub fn client(random: Box<dyn RandomSource>) -> Self {
    Self {
      role: Role::Client,
      random,
    }
  }

  pub fn role(&self) -> Role {
    self.role
  }

  /// Encode a text message frame into `buffer`.
  pub fn encode_text_frame(&mut self, buffer: &mut BytesMut, text: &str, fin: bool) {
    self.encode_frame(buffer, OpCode::Text, text.as_bytes(), fin);
  }

  /// Encode a binary message frame into `buffer`.
  pub fn encode_binary_frame(&mut self, buffer: &mut BytesMut, data: &[u8], fin: bool) {
    self.encode_frame(buffer, OpCode::Binary, data, fin);
  }

  /// Encode a ping frame, optionally with a payload for latency
  /// measurement.
  pub fn encode_ping_frame(&mut self, buffer: &mut BytesMut, payload: &[u8]) {
    self.encode_frame(buffer, OpCode::Ping, payload, true);
  }

  /// Encode a pong frame echoing the ping payload.
  pub fn encode_pong_frame(&mut self, buffer: &mut BytesMut, payload: &[u8]) {
    self.encode_frame(buffer, OpCode::Pong, payload, true);
  }

  /// Encode a close frame with a status code and optional reason.
  pub fn encode_close_frame(
    &mut self,
    buffer: &mut BytesMut,
    status_code: u16,
    reason: &str,
  ) {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&status_code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    self.encode_frame(buffer, OpCode::Close, &payload, true);
  }

  /// Encode a close frame from an already-assembled payload, as used when
  /// echoing the peer's close frame.
  pub fn encode_close_frame_raw(&mut self, buffer: &mut BytesMut, payload: &[u8]) {
    self.encode_frame(buffer, OpCode::Close, payload, true);
  }

  fn encode_frame(
    &mut self,
    buffer: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
  ) {
    buffer.clear();

    let mut first_byte = opcode as u8;
    if fin {
      first_byte |= 0x80;
    }
    buffer.put_u8(first_byte);

    let mask = self.role == Role::Client;
    let mask_bit: u8 = if mask { 0x80 } else { 0 };

    if payload.len() < 126 {
      buffer.put_u8(mask_bit | payload.len() as u8);
    } else if payload.len() < 65536 {
      buffer.put_u8(mask_bit | 126);
      buffer.put_u16(payload.len() as u16);
    } else {
      buffer.put_u8(mask_bit | 127);
      buffer.put_u64(payload.len() as u64);
    }

    if mask {
      let key = self.random.next_u32();
      let mask_key = [
        (key & 0xff) as u8,
        ((key >> 8) & 0xff) as u8,
        ((key >> 16) & 0xff) as u8,
        ((key >> 24) & 0xff) as u8,
      ];
      buffer.put_slice(&mask_key);
      buffer.reserve(payload.len());
      for (i, byte) in payload.iter().enumerate() {
        buffer.put_u8(byte ^ mask_key[i % 4]);
      }
    } else {
      buffer.put_slice(payload);
    }
  }
}
