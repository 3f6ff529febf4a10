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

use crate::ws_types::{ConnectionId, WriteCompleteCallback, WriteResult, WsMessage};

/// Sender side of the WebSocket contract, implemented by the connection
/// manager and handed to every endpoint callback.
///
/// Sends are not queued: while a write is in progress on a connection any
/// further send to it returns [`WriteResult::WriteInProgress`]. Sends that
/// return [`WriteResult::Success`] are delivered in the order they
/// returned. All methods must be called from endpoint callbacks, which run
/// on the server's event loop.
pub trait WsSender {
  /// Send a text message to a specific WebSocket connection.
  fn send_ws_text(
    &self,
    connection_id: ConnectionId,
    message: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult;

  /// Send binary data to a specific WebSocket connection.
  fn send_ws_binary(
    &self,
    connection_id: ConnectionId,
    data: &[u8],
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult;

  /// Send a close frame; 1000 is the normal-closure status code.
  fn send_ws_close(
    &self,
    connection_id: ConnectionId,
    status_code: u16,
    reason: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult;

  /// Ids of the active WebSocket connections bound to the endpoint at
  /// `path`, or of all WebSocket connections when `path` is `None`.
  fn active_ws_connections_for_endpoint(&self, path: Option<&str>) -> Vec<ConnectionId>;

  /// True while a write is in flight on the connection (or when it does
  /// not exist).
  fn is_write_in_progress(&self, connection_id: ConnectionId) -> bool;

  /// Convenience inverse of [`WsSender::is_write_in_progress`] for
  /// endpoints that poll before sending.
  fn can_send_to(&self, connection_id: ConnectionId) -> bool {
    !self.is_write_in_progress(connection_id)
  }
}

/// A WebSocket endpoint bound to a URL path.
///
/// Implementations receive the connection lifecycle events for every client
/// upgraded on their path and answer through the [`WsSender`] passed into
/// each callback.
///
/// For a given connection, `on_ws_open` strictly precedes any
/// `on_ws_message`, and exactly one of `on_ws_close` / `on_ws_error` is the
/// final callback.
///
/// # Example
///
/// ```
/// use beauty::{WsEndpoint, WsMessage, WsSender, ConnectionId};
///
/// struct EchoEndpoint;
///
/// impl WsEndpoint for EchoEndpoint {
///   fn path(&self) -> &str {
///     "/ws/echo"
///   }
///
///   fn on_ws_message(
///     &mut self,
///     sender: &dyn WsSender,
///     connection_id: ConnectionId,
///     message: &WsMessage<'_>,
///   ) {
///     if let Some(text) = message.as_text() {
///       sender.send_ws_text(connection_id, text, None);
///     }
///   }
/// }
/// ```
pub trait WsEndpoint {
  /// The URL path this endpoint handles, e.g. `/chat`.
  fn path(&self) -> &str;

  /// A client completed the upgrade handshake.
  fn on_ws_open(&mut self, _sender: &dyn WsSender, _connection_id: ConnectionId) {}

  /// A data frame arrived.
  fn on_ws_message(
    &mut self,
    _sender: &dyn WsSender,
    _connection_id: ConnectionId,
    _message: &WsMessage<'_>,
  ) {
  }

  /// The connection closed normally.
  fn on_ws_close(&mut self, _sender: &dyn WsSender, _connection_id: ConnectionId) {}

  /// The connection failed; no further callbacks follow.
  fn on_ws_error(
    &mut self,
    _sender: &dyn WsSender,
    _connection_id: ConnectionId,
    _error: &str,
  ) {
  }
}
