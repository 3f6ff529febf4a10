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

use std::time::Duration;

/// Server tuning knobs. Every field has a default; `Settings::default()` is a
/// reasonable configuration for both embedded and hosted targets.
#[derive(Debug, Clone)]
pub struct Settings {
  /// Keep-Alive timeout for inactive connections. Sent in the Keep-Alive
  /// response header. A zero duration disables keep-alive.
  pub keep_alive_timeout: Duration,

  /// Max number of requests that can be processed on a connection before it
  /// is closed. Sent in the Keep-Alive response header.
  pub keep_alive_max: usize,

  /// Limit on the number of persistent http connections. If exceeded,
  /// `Connection: close` is sent in the response for new connections.
  /// 0 = no limit.
  pub connection_limit: usize,

  /// Maximum duration to keep a WebSocket connection open without receiving
  /// any data (excluding pong responses) from the client. Zero = no timeout.
  pub ws_receive_timeout: Duration,

  /// Interval for sending ping frames to verify client responsiveness.
  /// Should be significantly less than `ws_receive_timeout` (typically a
  /// third of it). Zero = disable automatic ping (client activity only).
  pub ws_ping_interval: Duration,

  /// How long to wait for a pong response after sending a ping. If no pong
  /// is received within this time, the connection is closed.
  pub ws_pong_timeout: Duration,

  /// Capacity of the per-connection receive and send buffers. Bounds memory
  /// independently of message size. Minimum (and default) is 1024 bytes.
  pub max_content_size: usize,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      keep_alive_timeout: Duration::from_secs(5),
      keep_alive_max: 100,
      connection_limit: 0,
      ws_receive_timeout: Duration::from_secs(300),
      ws_ping_interval: Duration::from_secs(100),
      ws_pong_timeout: Duration::from_secs(5),
      max_content_size: 1024,
    }
  }
}
