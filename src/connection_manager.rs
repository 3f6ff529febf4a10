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

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::connection::ConnectionShared;
use crate::settings::Settings;
use crate::ws_endpoint::{WsEndpoint, WsSender};
use crate::ws_types::{ConnectionId, WriteCompleteCallback, WriteResult};

/// Callback for human-readable server diagnostics.
pub type DebugMsgCallback = Rc<dyn Fn(&str)>;

/// Registry of live connections.
///
/// Holds one shared handle per connection (the other owner is the
/// connection's reader task), expires idle sessions once per second, routes
/// upgrade requests to their [`WsEndpoint`] and implements the endpoints'
/// [`WsSender`] send-back contract.
pub(crate) struct ConnectionManager {
  settings: Settings,
  inner: RefCell<ManagerInner>,
}

struct ManagerInner {
  connections: HashMap<ConnectionId, Rc<ConnectionShared>>,
  endpoints: HashMap<String, Rc<RefCell<dyn WsEndpoint>>>,
  debug_cb: Option<DebugMsgCallback>,
}

impl ConnectionManager {
  pub fn new(settings: Settings) -> Self {
    Self {
      settings,
      inner: RefCell::new(ManagerInner {
        connections: HashMap::new(),
        endpoints: HashMap::new(),
        debug_cb: None,
      }),
    }
  }

  /// Register a new connection and decide its keep-alive policy.
  pub fn start(&self, connection: Rc<ConnectionShared>) {
    let mut inner = self.inner.borrow_mut();
    inner.connections.insert(connection.id, connection.clone());
    let settings = &self.settings;
    let use_keep_alive = settings.keep_alive_timeout != Duration::ZERO
      && (settings.connection_limit == 0
        || inner.connections.len() <= settings.connection_limit);
    connection.set_use_keep_alive(use_keep_alive);
  }

  pub fn remove(&self, connection_id: ConnectionId) {
    self.inner.borrow_mut().connections.remove(&connection_id);
  }

  pub fn stop_all(&self) {
    let connections: Vec<_> =
      self.inner.borrow().connections.values().cloned().collect();
    for connection in connections {
      connection.stop();
    }
    self.inner.borrow_mut().connections.clear();
  }

  /// Periodic housekeeping, driven once per second by the server timer.
  pub fn tick(&self) {
    let now = Instant::now();
    let connections: Vec<_> =
      self.inner.borrow().connections.values().cloned().collect();
    for connection in connections {
      if connection.is_stopped() {
        continue;
      }
      if connection.is_websocket() {
        self.tick_websocket(&connection, now);
      } else {
        self.tick_http(&connection, now);
      }
    }
  }

  fn tick_http(&self, connection: &Rc<ConnectionShared>, now: Instant) {
    if !connection.use_keep_alive() {
      return;
    }
    let settings = &self.settings;
    if now.duration_since(connection.last_received()) > settings.keep_alive_timeout {
      self.debug_msg(&format!(
        "connection {}: removing due to inactivity",
        connection.id
      ));
    } else if connection.nr_of_requests() >= settings.keep_alive_max {
      self.debug_msg(&format!(
        "connection {}: removing due to max request limit",
        connection.id
      ));
    } else {
      return;
    }
    self.remove(connection.id);
    connection.stop();
  }

  fn tick_websocket(&self, connection: &Rc<ConnectionShared>, now: Instant) {
    let settings = &self.settings;

    if settings.ws_receive_timeout != Duration::ZERO
      && now.duration_since(connection.last_received()) > settings.ws_receive_timeout
    {
      self.debug_msg(&format!(
        "connection {}: closing websocket after receive timeout",
        connection.id
      ));
      connection.send_ws_close(1000, "", None);
      self.remove(connection.id);
      connection.stop();
      return;
    }

    if settings.ws_pong_timeout != Duration::ZERO
      && connection.ping_overdue(now, settings.ws_pong_timeout)
    {
      self.debug_msg(&format!(
        "connection {}: closing websocket after missing pong",
        connection.id
      ));
      self.remove(connection.id);
      connection.stop();
      return;
    }

    if settings.ws_ping_interval != Duration::ZERO
      && now.duration_since(connection.last_activity()) >= settings.ws_ping_interval
    {
      connection.send_ws_ping();
    }
  }

  /// Replace the WebSocket endpoint set; connections upgraded later bind by
  /// request path.
  pub fn set_ws_endpoints(&self, endpoints: Vec<Rc<RefCell<dyn WsEndpoint>>>) {
    let mut inner = self.inner.borrow_mut();
    inner.endpoints.clear();
    for endpoint in endpoints {
      let path = endpoint.borrow().path().to_string();
      inner.endpoints.insert(path, endpoint);
    }
  }

  pub fn endpoint_for_path(&self, path: &str) -> Option<Rc<RefCell<dyn WsEndpoint>>> {
    self.inner.borrow().endpoints.get(path).cloned()
  }

  pub fn set_debug_msg_handler(&self, cb: DebugMsgCallback) {
    self.inner.borrow_mut().debug_cb = Some(cb);
  }

  pub fn debug_msg(&self, msg: &str) {
    let cb = self.inner.borrow().debug_cb.clone();
    if let Some(cb) = cb {
      cb(msg);
    }
  }

  pub fn as_sender(&self) -> &dyn WsSender {
    self
  }

  fn connection(&self, connection_id: ConnectionId) -> Option<Rc<ConnectionShared>> {
    self.inner.borrow().connections.get(&connection_id).cloned()
  }
}

impl WsSender for ConnectionManager {
  fn send_ws_text(
    &self,
    connection_id: ConnectionId,
    message: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    match self.connection(connection_id) {
      Some(connection) => connection.send_ws_text(message, callback),
      None => WriteResult::ConnectionClosed,
    }
  }

  fn send_ws_binary(
    &self,
    connection_id: ConnectionId,
    data: &[u8],
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    match self.connection(connection_id) {
      Some(connection) => connection.send_ws_binary(data, callback),
      None => WriteResult::ConnectionClosed,
    }
  }

  fn send_ws_close(
    &self,
    connection_id: ConnectionId,
    status_code: u16,
    reason: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    match self.connection(connection_id) {
      Some(connection) => connection.send_ws_close(status_code, reason, callback),
      None => WriteResult::ConnectionClosed,
    }
  }

  fn active_ws_connections_for_endpoint(&self, path: Option<&str>) -> Vec<ConnectionId> {
    let inner = self.inner.borrow();
    let mut ids: Vec<ConnectionId> = inner
      .connections
      .values()
      .filter(|c| c.is_websocket() && !c.is_stopped())
      .filter(|c| match path {
        Some(path) => c.endpoint_path().as_deref() == Some(path),
        None => true,
      })
      .map(|c| c.id)
      .collect();
    ids.sort_unstable();
    ids
  }

  fn is_write_in_progress(&self, connection_id: ConnectionId) -> bool {
    match self.connection(connection_id) {
      Some(connection) => connection.is_write_in_progress(),
      None => true,
    }
  }
}
