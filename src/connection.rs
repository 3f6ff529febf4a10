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
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::connection_manager::ConnectionManager;
use crate::error::Error;
use crate::handler::RequestHandler;
use crate::handshake;
use crate::reply::{Reply, Status, LAST_CHUNK};
use crate::request::Request;
use crate::request_parser::{ParseResult, RequestParser};
use crate::settings::Settings;
use crate::ws_encoder::WsEncoder;
use crate::ws_endpoint::WsEndpoint;
use crate::ws_parser::{WsParseResult, WsParser};
use crate::ws_types::{
  ConnectionId, WriteCompleteCallback, WriteResult, WsMessage,
};

/// State of a connection shared between its reader task, in-flight write
/// tasks and the connection manager.
///
/// The socket write half is parked here and taken for the duration of one
/// write, which keeps at most one write outstanding per connection. WebSocket
/// sends reject with [`WriteResult::WriteInProgress`] instead of queueing.
pub(crate) struct ConnectionShared {
  pub id: ConnectionId,
  // for the write continuations; the strong owners are the reader task and
  // the manager registry
  weak_self: Weak<ConnectionShared>,
  inner: RefCell<SharedInner>,
  stop_notify: Notify,
}

struct SharedInner {
  writer: Option<OwnedWriteHalf>,
  send_buf: BytesMut,
  ws_encoder: WsEncoder,
  write_in_progress: bool,
  close_after_write: bool,
  is_websocket: bool,
  endpoint_path: Option<String>,
  stopped: bool,
  use_keep_alive: bool,
  nr_of_requests: usize,
  last_activity: Instant,
  last_received: Instant,
  last_ping: Instant,
  last_pong: Instant,
}

impl ConnectionShared {
  fn new(
    id: ConnectionId,
    writer: OwnedWriteHalf,
    max_content_size: usize,
  ) -> Rc<Self> {
    let now = Instant::now();
    Rc::new_cyclic(|weak_self| Self {
      id,
      weak_self: weak_self.clone(),
      inner: RefCell::new(SharedInner {
        writer: Some(writer),
        send_buf: BytesMut::with_capacity(max_content_size),
        ws_encoder: WsEncoder::server(),
        write_in_progress: false,
        close_after_write: false,
        is_websocket: false,
        endpoint_path: None,
        stopped: false,
        use_keep_alive: false,
        nr_of_requests: 0,
        last_activity: now,
        last_received: now,
        last_ping: now,
        last_pong: now,
      }),
      stop_notify: Notify::new(),
    })
  }

  /// Stop all activity: half-close the socket and wake the reader. Safe to
  /// call repeatedly and from any owner.
  pub fn stop(&self) {
    {
      let mut inner = self.inner.borrow_mut();
      if inner.stopped {
        return;
      }
      inner.stopped = true;
      // dropping the write half sends FIN; the reader drops the other half
      inner.writer = None;
    }
    self.stop_notify.notify_one();
  }

  pub fn is_stopped(&self) -> bool {
    self.inner.borrow().stopped
  }

  pub fn is_websocket(&self) -> bool {
    self.inner.borrow().is_websocket
  }

  pub fn endpoint_path(&self) -> Option<String> {
    self.inner.borrow().endpoint_path.clone()
  }

  pub fn use_keep_alive(&self) -> bool {
    self.inner.borrow().use_keep_alive
  }

  pub fn set_use_keep_alive(&self, value: bool) {
    self.inner.borrow_mut().use_keep_alive = value;
  }

  pub fn nr_of_requests(&self) -> usize {
    self.inner.borrow().nr_of_requests
  }

  pub fn inc_requests(&self) {
    self.inner.borrow_mut().nr_of_requests += 1;
  }

  pub fn last_received(&self) -> Instant {
    self.inner.borrow().last_received
  }

  pub fn last_activity(&self) -> Instant {
    self.inner.borrow().last_activity
  }

  pub fn is_write_in_progress(&self) -> bool {
    self.inner.borrow().write_in_progress
  }

  /// True when a ping has been sent after the last pong and the reply is
  /// overdue.
  pub fn ping_overdue(&self, now: Instant, pong_timeout: Duration) -> bool {
    let inner = self.inner.borrow();
    inner.last_ping > inner.last_pong
      && now.duration_since(inner.last_ping) > pong_timeout
  }

  fn touch_received(&self) {
    let mut inner = self.inner.borrow_mut();
    let now = Instant::now();
    inner.last_received = now;
    inner.last_activity = now;
  }

  fn touch_pong(&self) {
    self.inner.borrow_mut().last_pong = Instant::now();
  }

  fn begin_websocket(&self, path: String) {
    let mut inner = self.inner.borrow_mut();
    let now = Instant::now();
    inner.is_websocket = true;
    inner.endpoint_path = Some(path);
    inner.last_ping = now;
    inner.last_pong = now;
  }

  fn take_writer(&self) -> Option<OwnedWriteHalf> {
    let mut inner = self.inner.borrow_mut();
    if inner.stopped {
      return None;
    }
    inner.writer.take()
  }

  fn put_writer(&self, writer: OwnedWriteHalf) {
    let mut inner = self.inner.borrow_mut();
    inner.last_activity = Instant::now();
    if !inner.stopped {
      inner.writer = Some(writer);
    }
  }

  pub fn send_ws_text(
    &self,
    message: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    self.send_ws_frame(false, callback, |encoder, buf| {
      encoder.encode_text_frame(buf, message, true)
    })
  }

  pub fn send_ws_binary(
    &self,
    data: &[u8],
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    self.send_ws_frame(false, callback, |encoder, buf| {
      encoder.encode_binary_frame(buf, data, true)
    })
  }

  pub fn send_ws_close(
    &self,
    status_code: u16,
    reason: &str,
    callback: Option<WriteCompleteCallback>,
  ) -> WriteResult {
    self.send_ws_frame(true, callback, |encoder, buf| {
      encoder.encode_close_frame(buf, status_code, reason)
    })
  }

  /// Echo the peer's close frame payload back, then close.
  fn send_ws_close_echo(&self, payload: &[u8]) -> WriteResult {
    self.send_ws_frame(true, None, |encoder, buf| {
      encoder.encode_close_frame_raw(buf, payload)
    })
  }

  pub fn send_ws_ping(&self) -> WriteResult {
    let result = self.send_ws_frame(false, None, |encoder, buf| {
      encoder.encode_ping_frame(buf, b"")
    });
    if result == WriteResult::Success {
      self.inner.borrow_mut().last_ping = Instant::now();
    }
    result
  }

  fn send_ws_pong(&self, payload: &[u8]) -> WriteResult {
    // skipped when a write is in flight; the peer simply pings again
    self.send_ws_frame(false, None, |encoder, buf| {
      encoder.encode_pong_frame(buf, payload)
    })
  }

  fn send_ws_frame(
    &self,
    closing: bool,
    callback: Option<WriteCompleteCallback>,
    encode: impl FnOnce(&mut WsEncoder, &mut BytesMut),
  ) -> WriteResult {
    let Some(shared) = self.weak_self.upgrade() else {
      return WriteResult::ConnectionClosed;
    };
    let data;
    let writer;
    {
      let mut inner = self.inner.borrow_mut();
      if inner.stopped || !inner.is_websocket {
        return WriteResult::ConnectionClosed;
      }
      if inner.write_in_progress {
        return WriteResult::WriteInProgress;
      }
      writer = match inner.writer.take() {
        Some(writer) => writer,
        None => return WriteResult::ConnectionClosed,
      };
      {
        let SharedInner {
          ws_encoder,
          send_buf,
          ..
        } = &mut *inner;
        encode(ws_encoder, send_buf);
      }
      inner.write_in_progress = true;
      if closing {
        inner.close_after_write = true;
      }
      data = inner.send_buf.split();
    }

    tokio::task::spawn_local(async move {
      let mut writer = writer;
      let result = writer.write_all(&data).await;
      let written = data.len();
      let failed = result.is_err();
      let close;
      {
        let mut inner = shared.inner.borrow_mut();
        inner.write_in_progress = false;
        inner.last_activity = Instant::now();
        close = inner.close_after_write || failed;
        if !inner.stopped && !close {
          inner.writer = Some(writer);
        }
        // otherwise the writer drops here, half-closing the socket
      }
      if let Some(callback) = callback {
        callback(result.map(|_| written).map_err(Error::from));
      }
      if close {
        shared.stop();
      }
    });
    WriteResult::Success
  }
}

enum Outcome {
  Reply,
  Upgrade,
  Close,
}

/// A single client connection, driven as one task from read through parse,
/// handler dispatch, response write and either keep-alive recycling or
/// close.
pub(crate) struct Connection {
  shared: Rc<ConnectionShared>,
  manager: Rc<ConnectionManager>,
  handler: Rc<RequestHandler>,
  reader: OwnedReadHalf,
  recv_buf: Vec<u8>,
  send_buf: BytesMut,
  request: Request,
  reply: Reply,
  parser: RequestParser,
  ws_parser: WsParser,
  ws_endpoint: Option<Rc<RefCell<dyn WsEndpoint>>>,
  ws_opened: bool,
  close_connection: bool,
  max_content_size: usize,
  keep_alive_timeout: Duration,
  keep_alive_max: usize,
}

impl Connection {
  pub fn new(
    socket: TcpStream,
    manager: Rc<ConnectionManager>,
    handler: Rc<RequestHandler>,
    connection_id: ConnectionId,
    settings: &Settings,
  ) -> Self {
    let (reader, writer) = socket.into_split();
    let max = settings.max_content_size;
    Self {
      shared: ConnectionShared::new(connection_id, writer, max),
      manager,
      handler,
      reader,
      recv_buf: Vec::with_capacity(max),
      send_buf: BytesMut::with_capacity(max),
      request: Request::new(),
      reply: Reply::new(max),
      parser: RequestParser::new(max),
      ws_parser: WsParser::new(max),
      ws_endpoint: None,
      ws_opened: false,
      close_connection: false,
      max_content_size: max,
      keep_alive_timeout: settings.keep_alive_timeout,
      keep_alive_max: settings.keep_alive_max,
    }
  }

  pub fn shared(&self) -> Rc<ConnectionShared> {
    self.shared.clone()
  }

  pub async fn run(mut self) {
    let result = self.handle_connection().await;

    if let Err(error) = &result {
      if !matches!(error, Error::ConnectionClosed) {
        self
          .manager
          .debug_msg(&format!("connection {}: {}", self.shared.id, error));
      }
    }

    // release file sink state held past an aborted request
    if result.is_err()
      || (self.reply.reply_partial && !self.reply.final_part)
      || !self.reply.last_open_write_id.is_empty()
    {
      self.handler.close_file(self.shared.id, &mut self.reply);
    }

    if self.ws_opened {
      if let Some(endpoint) = self.ws_endpoint.clone() {
        match &result {
          Ok(()) => endpoint
            .borrow_mut()
            .on_ws_close(self.manager.as_sender(), self.shared.id),
          Err(error) => endpoint.borrow_mut().on_ws_error(
            self.manager.as_sender(),
            self.shared.id,
            &error.to_string(),
          ),
        }
      }
    }

    self.manager.remove(self.shared.id);
    self.shared.stop();
  }

  async fn handle_connection(&mut self) -> Result<(), Error> {
    loop {
      self.request.reset();
      self.reply.reset();
      self.parser.reset();
      self.recv_buf.clear();
      self.close_connection = false;

      match self.read_request().await? {
        Outcome::Close => return Ok(()),
        Outcome::Reply => {
          self.shared.inc_requests();
          let keep_alive = self.write_reply().await?;
          if !keep_alive {
            return Ok(());
          }
        }
        Outcome::Upgrade => {
          self.shared.inc_requests();
          self.write_reply().await?;
          self.shared.begin_websocket(self.request.request_path.clone());
          self.ws_opened = true;
          if let Some(endpoint) = self.ws_endpoint.clone() {
            endpoint
              .borrow_mut()
              .on_ws_open(self.manager.as_sender(), self.shared.id);
          }
          return self.run_websocket().await;
        }
      }
    }
  }

  /// Read and parse one request, dispatching to the handler chain.
  async fn read_request(&mut self) -> Result<Outcome, Error> {
    let mut wrote_100_continue = false;
    loop {
      let filled = self.recv_buf.len();
      let bytes_read = match self.read_some(filled).await? {
        None => return Ok(Outcome::Close),
        Some(n) => n,
      };
      if bytes_read == 0 {
        // a peer that goes away between requests is a normal close
        if self.parser.at_start() && !wrote_100_continue {
          return Ok(Outcome::Close);
        }
        return Err(Error::UnexpectedEOF);
      }

      let result = self.parser.parse(&mut self.request, &mut self.recv_buf, filled);
      match result {
        ParseResult::Indeterminate => continue,
        ParseResult::GoodComplete => {
          self.reply.no_body_bytes_received = self.parser.body_bytes_received();
          if !self.request.decode(&self.recv_buf) {
            self.reply.stock_reply(&self.request, Status::BadRequest);
            return Ok(Outcome::Reply);
          }
          self.request.body = self.recv_buf.clone();
          self.dispatch_request();
          return Ok(Outcome::Reply);
        }
        ParseResult::GoodPart => {
          self.reply.no_body_bytes_received = self.parser.body_bytes_received();
          if !self.request.decode(&self.recv_buf) {
            self.reply.stock_reply(&self.request, Status::BadRequest);
            return Ok(Outcome::Reply);
          }
          self.request.body = self.recv_buf.clone();
          self.dispatch_request();
          if self.reply.is_multipart {
            return self.pump_multipart_upload().await;
          }
          if self.reply.return_to_client && !self.reply.status().is_success() {
            // rejected before the body finished; the unread body poisons
            // the stream for keep-alive
            self.close_connection = true;
            return Ok(Outcome::Reply);
          }
          self.drain_request_body().await?;
          return Ok(Outcome::Reply);
        }
        ParseResult::GoodHeadersExpectContinue => {
          self
            .handler
            .should_continue_after_headers(&self.request, &mut self.reply);
          if self.reply.return_to_client && !self.reply.status().is_success() {
            // the handler rejected the body; reply without consuming it
            self.close_connection = true;
            return Ok(Outcome::Reply);
          }
          self.reply.reset();
          self.write_all_shared(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
          wrote_100_continue = true;
          continue;
        }
        ParseResult::ExpectContinueWithBody => {
          self.reply.stock_reply(&self.request, Status::BadRequest);
          return Ok(Outcome::Reply);
        }
        ParseResult::UpgradeToWebsocket => {
          if !self.request.decode(&self.recv_buf) {
            self.reply.stock_reply(&self.request, Status::BadRequest);
            return Ok(Outcome::Reply);
          }
          let Some(endpoint) =
            self.manager.endpoint_for_path(&self.request.request_path)
          else {
            self.reply.stock_reply(&self.request, Status::NotFound);
            return Ok(Outcome::Reply);
          };
          let accept = handshake::sec_websocket_accept(
            self.request.header_value("Sec-WebSocket-Key"),
          );
          self.reply.send(Status::SwitchingProtocols);
          self.reply.add_header("Upgrade", "websocket");
          self.reply.add_header("Connection", "Upgrade");
          self.reply.add_header("Sec-WebSocket-Accept", &accept);
          self.ws_endpoint = Some(endpoint);
          return Ok(Outcome::Upgrade);
        }
        ParseResult::Bad => {
          self.reply.stock_reply(&self.request, Status::BadRequest);
          return Ok(Outcome::Reply);
        }
        ParseResult::VersionNotSupported => {
          self.reply.stock_reply(&self.request, Status::VersionNotSupported);
          return Ok(Outcome::Reply);
        }
        ParseResult::MissingContentLength => {
          self.reply.stock_reply(&self.request, Status::LengthRequired);
          return Ok(Outcome::Reply);
        }
        ParseResult::NotImplemented => {
          self.reply.stock_reply(&self.request, Status::NotImplemented);
          return Ok(Outcome::Reply);
        }
      }
    }
  }

  fn dispatch_request(&mut self) {
    self.handler.handle_request(
      self.shared.id,
      &self.request,
      &mut self.recv_buf,
      &mut self.reply,
    );
  }

  /// Swallow the remainder of a body that no handler consumes.
  async fn drain_request_body(&mut self) -> Result<(), Error> {
    let mut received = self.parser.body_bytes_received();
    while received < self.request.content_length {
      self.recv_buf.clear();
      let bytes_read = match self.read_some(0).await? {
        None => return Err(Error::ConnectionClosed),
        Some(n) => n,
      };
      if bytes_read == 0 {
        return Err(Error::UnexpectedEOF);
      }
      received += bytes_read;
      self.reply.no_body_bytes_received = received;
    }
    Ok(())
  }

  /// Stream the remaining multipart body chunks into the file sink,
  /// acknowledging each newly opened file with an interim response.
  async fn pump_multipart_upload(&mut self) -> Result<Outcome, Error> {
    let mut received = self.parser.body_bytes_received();
    let mut acked_files = 0;
    loop {
      if self.reply.return_to_client && !self.reply.status().is_success() {
        self.close_connection = true;
        return Ok(Outcome::Reply);
      }
      if received >= self.request.content_length {
        return Ok(Outcome::Reply);
      }
      if self.reply.multipart_counter != acked_files {
        acked_files = self.reply.multipart_counter;
        self.write_part_ack().await?;
      }

      self.recv_buf.clear();
      let bytes_read = match self.read_some(0).await? {
        None => return Err(Error::ConnectionClosed),
        Some(n) => n,
      };
      if bytes_read == 0 {
        return Err(Error::UnexpectedEOF);
      }
      received += bytes_read;
      self.reply.no_body_bytes_received = received;

      self.handler.handle_partial_write(
        self.shared.id,
        &self.request,
        &mut self.recv_buf,
        &mut self.reply,
      );
    }
  }

  /// Header-only interim response for a file opened mid-upload.
  async fn write_part_ack(&mut self) -> Result<(), Error> {
    self.send_buf.clear();
    self.reply.serialize_headers(&mut self.send_buf);
    let data = self.send_buf.split();
    self.write_all_shared(&data).await?;

    // clear the reply surface for the next part; upload state stays
    self.reply.headers.clear();
    self.reply.content.clear();
    self.reply.return_to_client = false;
    self.reply.status = Status::Ok;
    Ok(())
  }

  /// Write the finalised reply. Returns whether the connection should be
  /// recycled for another request.
  async fn write_reply(&mut self) -> Result<bool, Error> {
    let connection_header = self.reply.header_value("Connection").to_string();
    let keep_alive = self.request.keep_alive
      && self.shared.use_keep_alive()
      && !self.close_connection
      && !connection_header.eq_ignore_ascii_case("close")
      && self.shared.nr_of_requests() < self.keep_alive_max;

    if connection_header.is_empty() {
      if keep_alive {
        self.reply.add_header("Connection", "keep-alive");
        let value = format!(
          "timeout={}, max={}",
          self.keep_alive_timeout.as_secs(),
          self.keep_alive_max
        );
        self.reply.add_header("Keep-Alive", &value);
      } else {
        self.reply.add_header("Connection", "close");
      }
    }

    self.send_buf.clear();
    self.reply.serialize_headers(&mut self.send_buf);
    let headers = self.send_buf.split();
    self.write_all_shared(&headers).await?;

    // HEAD replies carry the headers of the body they suppress
    if self.request.method != "HEAD" {
      if let Some(data) = self.reply.content_static {
        self.write_all_shared(data).await?;
      } else {
        if !self.reply.content.is_empty() {
          let content = std::mem::take(&mut self.reply.content);
          self.write_all_shared(&content).await?;
          self.reply.content = content;
        }
        if self.reply.use_chunked_encoding {
          self.pump_chunked_stream().await?;
        } else if self.reply.stream_callback.is_some() {
          self.pump_sized_stream().await?;
        } else if self.reply.reply_partial {
          self.pump_file_read().await?;
        }
      }
    }

    Ok(keep_alive)
  }

  /// Chunked transfer-encoding pump: wrap every callback pull in hex-length
  /// framing and finish with the terminal chunk.
  async fn pump_chunked_stream(&mut self) -> Result<(), Error> {
    loop {
      let pulled = self.pull_stream_chunk();
      if pulled == 0 {
        self.write_all_shared(LAST_CHUNK).await?;
        return Ok(());
      }
      self.reply.wrap_content_in_chunk_format();
      let content = std::mem::take(&mut self.reply.content);
      self.write_all_shared(&content).await?;
      self.reply.content = content;
    }
  }

  /// Content-Length is known; pull until the callback runs dry or the
  /// declared size is reached.
  async fn pump_sized_stream(&mut self) -> Result<(), Error> {
    loop {
      if self.reply.total_stream_size > 0
        && self.reply.streamed_bytes >= self.reply.total_stream_size
      {
        return Ok(());
      }
      let pulled = self.pull_stream_chunk();
      if pulled == 0 {
        return Ok(());
      }
      let content = std::mem::take(&mut self.reply.content);
      self.write_all_shared(&content).await?;
      self.reply.content = content;
    }
  }

  /// File-read pump for replies larger than the buffer.
  async fn pump_file_read(&mut self) -> Result<(), Error> {
    while !self.reply.final_part {
      self.handler.handle_partial_read(
        self.shared.id,
        &self.request,
        &mut self.reply,
      );
      if self.reply.content.is_empty() {
        continue;
      }
      let content = std::mem::take(&mut self.reply.content);
      self.write_all_shared(&content).await?;
      self.reply.content = content;
    }
    Ok(())
  }

  fn pull_stream_chunk(&mut self) -> usize {
    let Reply {
      stream_callback,
      content,
      streamed_bytes,
      ..
    } = &mut self.reply;
    let Some(callback) = stream_callback else {
      return 0;
    };
    content.resize(self.max_content_size, 0);
    let pulled = callback(self.shared.id, &mut content[..]);
    let pulled = pulled.min(content.len());
    content.truncate(pulled);
    *streamed_bytes += pulled;
    pulled
  }

  /// WebSocket runtime: parse inbound frames, dispatch to the endpoint,
  /// auto-reply pings, track pongs, echo closes.
  async fn run_websocket(&mut self) -> Result<(), Error> {
    self.recv_buf.clear();
    self.ws_parser.reset();
    loop {
      let filled = self.recv_buf.len();
      let bytes_read = match self.read_some(filled).await? {
        None => return Ok(()),
        Some(n) => n,
      };
      if bytes_read == 0 {
        // the peer vanished without a close frame
        return Err(Error::UnexpectedEOF);
      }

      let mut start = filled;
      loop {
        let (result, consumed) = match self.ws_parser.parse(&mut self.recv_buf, start)
        {
          Ok(parsed) => parsed,
          Err(error) => {
            let code = match error {
              Error::FrameTooLarge => 1009,
              _ => 1002,
            };
            self.shared.send_ws_close(code, "", None);
            return Err(error);
          }
        };

        match result {
          WsParseResult::Indeterminate => {
            self.recv_buf.truncate(self.ws_parser.payload_read());
            break;
          }
          WsParseResult::FragmentationError => {
            self.shared.send_ws_close(1002, "fragmented frames not supported", None);
            return Err(Error::FragmentedFrame);
          }
          WsParseResult::DataFrame => {
            let payload_len = self.ws_parser.payload_read();
            if let Some(endpoint) = &self.ws_endpoint {
              let message = WsMessage {
                opcode: self.ws_parser.opcode(),
                fin: self.ws_parser.is_final(),
                content: &self.recv_buf[..payload_len],
              };
              endpoint.borrow_mut().on_ws_message(
                self.manager.as_sender(),
                self.shared.id,
                &message,
              );
            }
            start = self.finish_frame(consumed);
            if self.recv_buf.is_empty() {
              break;
            }
          }
          WsParseResult::PingFrame => {
            let payload_len = self.ws_parser.payload_read();
            let payload = self.recv_buf[..payload_len].to_vec();
            self.shared.send_ws_pong(&payload);
            start = self.finish_frame(consumed);
            if self.recv_buf.is_empty() {
              break;
            }
          }
          WsParseResult::PongFrame => {
            self.shared.touch_pong();
            start = self.finish_frame(consumed);
            if self.recv_buf.is_empty() {
              break;
            }
          }
          WsParseResult::CloseFrame => {
            let payload_len = self.ws_parser.payload_read();
            let payload = self.recv_buf[..payload_len].to_vec();
            self.shared.send_ws_close_echo(&payload);
            return Ok(());
          }
        }
      }
    }
  }

  /// Drop a consumed frame from the buffer, keeping bytes of the next one.
  fn finish_frame(&mut self, consumed: usize) -> usize {
    let len = self.recv_buf.len();
    if consumed < len {
      self.recv_buf.copy_within(consumed.., 0);
      self.recv_buf.truncate(len - consumed);
    } else {
      self.recv_buf.clear();
    }
    self.ws_parser.reset();
    0
  }

  /// One socket read into the buffer behind `filled` kept bytes. `None`
  /// means the connection was stopped; 0 bytes means the peer closed.
  async fn read_some(&mut self, filled: usize) -> Result<Option<usize>, Error> {
    if self.shared.is_stopped() {
      return Ok(None);
    }
    self.recv_buf.resize(self.max_content_size, 0);
    let read = tokio::select! {
      read = self.reader.read(&mut self.recv_buf[filled..]) => Some(read),
      _ = self.shared.stop_notify.notified() => None,
    };
    match read {
      None => {
        self.recv_buf.truncate(filled);
        Ok(None)
      }
      Some(read) => {
        let bytes_read = read?;
        self.recv_buf.truncate(filled + bytes_read);
        if bytes_read > 0 {
          self.shared.touch_received();
        }
        Ok(Some(bytes_read))
      }
    }
  }

  async fn write_all_shared(&self, data: &[u8]) -> Result<(), Error> {
    let Some(mut writer) = self.shared.take_writer() else {
      return Err(Error::ConnectionClosed);
    };
    let result = writer.write_all(data).await;
    self.shared.put_writer(writer);
    result.map_err(Error::from)
  }
}
