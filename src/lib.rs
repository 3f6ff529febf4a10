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

//! _beauty_ is an embeddable HTTP/1.1 + WebSocket server designed to run on
//! both constrained devices and general-purpose hosts.
//!
//! Many simultaneous connections are multiplexed over a single-threaded
//! cooperative event loop, and request and response bodies stream through a
//! bounded per-connection buffer (`max_content_size`, 1024 bytes by
//! default), so memory consumption stays independent of message size.
//!
//! File storage is abstracted behind the [`FileIO`] trait, application
//! logic behind an ordered chain of request handlers, and WebSocket
//! applications behind path-bound [`WsEndpoint`] implementations.
//!
//! # Example
//!
//! ```no_run
//! use beauty::{Server, Settings, Status};
//!
//! fn main() -> Result<(), beauty::Error> {
//!   let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()?;
//!   let local = tokio::task::LocalSet::new();
//!   local.block_on(&runtime, async {
//!     let mut server = Server::new(8080, Settings::default()).await?;
//!     server.add_request_handler(Box::new(|req, rep| {
//!       if req.request_path == "/api/status" {
//!         rep.content.extend_from_slice(b"{\"running\":true}");
//!         rep.send_content(Status::Ok, "application/json");
//!       }
//!     }));
//!     server.run().await;
//!     Ok(())
//!   })
//! }
//! ```
//!
//! # WebSockets
//!
//! An endpoint receives open/message/close/error notifications for every
//! client upgraded on its path and answers through the [`WsSender`] handed
//! to each callback. Sends are never queued by the server: while a write is
//! in flight further sends return [`WriteResult::WriteInProgress`], and
//! endpoints that need queueing layer their own on top of
//! [`WsSender::can_send_to`].
//!
//! ```no_run
//! use beauty::{Server, Settings, WsEndpoint, WsMessage, WsSender, ConnectionId};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! struct ChatEndpoint;
//!
//! impl WsEndpoint for ChatEndpoint {
//!   fn path(&self) -> &str {
//!     "/ws/chat"
//!   }
//!
//!   fn on_ws_message(
//!     &mut self,
//!     sender: &dyn WsSender,
//!     connection_id: ConnectionId,
//!     message: &WsMessage<'_>,
//!   ) {
//!     if let Some(text) = message.as_text() {
//!       for id in sender.active_ws_connections_for_endpoint(Some("/ws/chat")) {
//!         if id != connection_id {
//!           sender.send_ws_text(id, text, None);
//!         }
//!       }
//!     }
//!   }
//! }
//!
//! # async fn setup() -> Result<(), beauty::Error> {
//! let mut server = Server::new(8080, Settings::default()).await?;
//! server.set_ws_endpoints(vec![Rc::new(RefCell::new(ChatEndpoint))]);
//! server.run().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod connection_manager;
mod error;
mod file_io;
mod handler;
/// WebSocket handshake digest.
pub mod handshake;
/// MIME type lookup for file replies.
pub mod mime;
mod multipart;
mod random;
mod reply;
mod request;
mod request_parser;
mod server;
mod settings;
mod ws_encoder;
mod ws_endpoint;
mod ws_parser;
mod ws_types;

pub use crate::connection_manager::DebugMsgCallback;
pub use crate::error::Error;
pub use crate::file_io::FileIO;
pub use crate::handler::HandlerCallback;
pub use crate::multipart::{ContentPart, MultipartParser, MultipartResult};
pub use crate::random::{DefaultRandom, FastRandom, RandomSource};
pub use crate::reply::{Reply, Status, StreamCallback};
pub use crate::request::{Header, Request};
pub use crate::request_parser::{ParseResult, RequestParser};
pub use crate::server::{Server, MIN_CONTENT_SIZE};
pub use crate::settings::Settings;
pub use crate::ws_encoder::{Role, WsEncoder};
pub use crate::ws_endpoint::{WsEndpoint, WsSender};
pub use crate::ws_parser::{WsParseResult, WsParser};
pub use crate::ws_types::{
  ConnectionId, OpCode, WriteCompleteCallback, WriteResult, WsMessage,
};
