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

/// Unique id of an accepted connection, assigned monotonically from server
/// start. Used as the key for file-sink and WebSocket send operations.
pub type ConnectionId = u32;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
  Continuation = 0x0,
  Text = 0x1,
  Binary = 0x2,
  Close = 0x8,
  Ping = 0x9,
  Pong = 0xA,
}

impl OpCode {
  pub fn is_control(&self) -> bool {
    matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
  }
}

impl TryFrom<u8> for OpCode {
  type Error = Error;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0x0 => Ok(OpCode::Continuation),
      0x1 => Ok(OpCode::Text),
      0x2 => Ok(OpCode::Binary),
      0x8 => Ok(OpCode::Close),
      0x9 => Ok(OpCode::Ping),
      0xA => Ok(OpCode::Pong),
      _ => Err(Error::InvalidOpCode(value)),
    }
  }
}

/// A data message received over WebSocket. The payload borrows the
/// connection's receive buffer and is only valid for the duration of the
/// endpoint callback.
#[derive(Debug)]
pub struct WsMessage<'a> {
  pub opcode: OpCode,
  pub fin: bool,
  pub content: &'a [u8],
}

impl<'a> WsMessage<'a> {
  /// Payload as text, for `OpCode::Text` messages of well-behaved clients.
  pub fn as_text(&self) -> Option<&'a str> {
    std::str::from_utf8(self.content).ok()
  }
}

/// Result of a WebSocket write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
  /// Write operation started successfully.
  Success,
  /// Another write is already in progress. The message is *not* queued;
  /// layering a queue on top is the endpoint's concern.
  WriteInProgress,
  /// Connection is closed or not found.
  ConnectionClosed,
}

/// Callback for write completion notification. Receives the number of bytes
/// written, or the error that ended the write.
pub type WriteCompleteCallback = Box<dyn FnOnce(Result<usize, Error>)>;
