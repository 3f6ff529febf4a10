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
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;

use crate::connection::Connection;
use crate::connection_manager::{ConnectionManager, DebugMsgCallback};
use crate::error::Error;
use crate::file_io::FileIO;
use crate::handler::{HandlerCallback, RequestHandler};
use crate::settings::Settings;
use crate::ws_endpoint::WsEndpoint;
use crate::ws_types::ConnectionId;

/// Smallest allowed per-connection buffer.
pub const MIN_CONTENT_SIZE: usize = 1024;

/// The server: accept loop, connection-id allocation and the one-second
/// housekeeping timer.
///
/// All protocol work runs on the calling task's thread; `run` must execute
/// inside a [`tokio::task::LocalSet`] on a current-thread runtime. A handler
/// that blocks stalls the whole server — that is the documented cost of the
/// single-threaded model.
pub struct Server {
  listener: TcpListener,
  manager: Rc<ConnectionManager>,
  handler: RequestHandler,
  settings: Settings,
  content_size_clamped: bool,
}

impl Server {
  /// Bind all interfaces on `port`. Suitable for embedded targets; pass
  /// port 0 to let the OS pick one.
  pub async fn new(port: u16, settings: Settings) -> Result<Server, Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    Ok(Self::from_listener(listener, settings))
  }

  /// Bind a specific address and port, resolved like `getaddrinfo`.
  pub async fn bind(
    address: &str,
    port: &str,
    settings: Settings,
  ) -> Result<Server, Error> {
    let mut addresses =
      tokio::net::lookup_host(format!("{}:{}", address, port)).await?;
    let address = addresses.next().ok_or_else(|| {
      Error::IoError(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "address did not resolve",
      ))
    })?;
    let listener = TcpListener::bind(address).await?;
    Ok(Self::from_listener(listener, settings))
  }

  fn from_listener(listener: TcpListener, mut settings: Settings) -> Server {
    let content_size_clamped = settings.max_content_size < MIN_CONTENT_SIZE;
    settings.max_content_size = settings.max_content_size.max(MIN_CONTENT_SIZE);
    Server {
      listener,
      manager: Rc::new(ConnectionManager::new(settings.clone())),
      handler: RequestHandler::new(),
      settings,
      content_size_clamped,
    }
  }

  /// The locally bound port; useful after binding port 0.
  pub fn bound_port(&self) -> u16 {
    self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
  }

  pub fn local_addr(&self) -> Result<SocketAddr, Error> {
    Ok(self.listener.local_addr()?)
  }

  /// Register the file storage sink used by the default GET and multipart
  /// POST flows.
  pub fn set_file_io(&mut self, file_io: Rc<RefCell<dyn FileIO>>) {
    self.handler.set_file_io(file_io);
  }

  /// Append a handler to the request chain.
  pub fn add_request_handler(&mut self, cb: HandlerCallback) {
    self.handler.add_request_handler(cb);
  }

  /// Decide `Expect: 100-continue` requests before their body is read.
  pub fn set_expect_continue_handler(&mut self, cb: HandlerCallback) {
    self.handler.set_expect_continue_handler(cb);
  }

  /// Replace the stock 404 for requests nothing else answered.
  pub fn set_not_found_handler(&mut self, cb: HandlerCallback) {
    self.handler.set_not_found_handler(cb);
  }

  /// Replace the WebSocket endpoint set; upgrades bind by request path.
  pub fn set_ws_endpoints(&mut self, endpoints: Vec<Rc<RefCell<dyn WsEndpoint>>>) {
    self.manager.set_ws_endpoints(endpoints);
  }

  /// Receive human-readable diagnostics (accept failures, connection
  /// errors, expiry decisions).
  pub fn set_debug_msg_handler(&mut self, cb: DebugMsgCallback) {
    self.manager.set_debug_msg_handler(cb);
  }

  /// Serve until ctrl-c.
  pub async fn run(self) {
    self
      .run_until(async {
        let _ = tokio::signal::ctrl_c().await;
      })
      .await;
  }

  /// Serve until `shutdown` completes, then stop every connection.
  pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) {
    let Server {
      listener,
      manager,
      handler,
      settings,
      content_size_clamped,
    } = self;

    if content_size_clamped {
      manager.debug_msg("max_content_size raised to the 1024 byte minimum");
    }

    let handler = Rc::new(handler);
    let mut next_connection_id: ConnectionId = 0;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        accepted = listener.accept() => match accepted {
          Ok((socket, _peer)) => {
            let connection = Connection::new(
              socket,
              manager.clone(),
              handler.clone(),
              next_connection_id,
              &settings,
            );
            next_connection_id = next_connection_id.wrapping_add(1);
            manager.start(connection.shared());
            tokio::task::spawn_local(connection.run());
          }
          Err(error) => {
            manager.debug_msg(&format!("accept: {}", error));
          }
        },
        _ = tick.tick() => manager.tick(),
        _ = &mut shutdown => {
          manager.stop_all();
          break;
        }
      }
    }
  }
}
