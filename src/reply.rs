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

use crate::multipart::MultipartParser;
use crate::request::{Header, Request};
use crate::ws_types::ConnectionId;

/// Callback for streaming reply data. Fills `buf` and returns the number of
/// bytes written; 0 signals end of stream.
pub type StreamCallback = Box<dyn FnMut(ConnectionId, &mut [u8]) -> usize>;

/// Reply status codes, with the exact status-line literals on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  SwitchingProtocols = 101,
  Ok = 200,
  Created = 201,
  Accepted = 202,
  NoContent = 204,
  MultipleChoices = 300,
  MovedPermanently = 301,
  MovedTemporarily = 302,
  NotModified = 304,
  BadRequest = 400,
  Unauthorized = 401,
  Forbidden = 403,
  NotFound = 404,
  MethodNotAllowed = 405,
  Conflict = 409,
  Gone = 410,
  LengthRequired = 411,
  PreconditionFailed = 412,
  PayloadTooLarge = 413,
  ExpectationFailed = 417,
  InternalServerError = 500,
  NotImplemented = 501,
  BadGateway = 502,
  ServiceUnavailable = 503,
  VersionNotSupported = 505,
}

impl Status {
  pub fn code(self) -> u16 {
    self as u16
  }

  pub(crate) fn status_line(self) -> &'static str {
    match self {
      Status::SwitchingProtocols => "HTTP/1.1 101 Switching Protocols\r\n",
      Status::Ok => "HTTP/1.1 200 OK\r\n",
      Status::Created => "HTTP/1.1 201 Created\r\n",
      Status::Accepted => "HTTP/1.1 202 Accepted\r\n",
      Status::NoContent => "HTTP/1.1 204 No Content\r\n",
      Status::MultipleChoices => "HTTP/1.1 300 Multiple Choices\r\n",
      Status::MovedPermanently => "HTTP/1.1 301 Moved Permanently\r\n",
      Status::MovedTemporarily => "HTTP/1.1 302 Moved Temporarily\r\n",
      Status::NotModified => "HTTP/1.1 304 Not Modified\r\n",
      Status::BadRequest => "HTTP/1.1 400 Bad Request\r\n",
      Status::Unauthorized => "HTTP/1.1 401 Unauthorized\r\n",
      Status::Forbidden => "HTTP/1.1 403 Forbidden\r\n",
      Status::NotFound => "HTTP/1.1 404 Not Found\r\n",
      Status::MethodNotAllowed => "HTTP/1.1 405 Method Not Allowed\r\n",
      Status::Conflict => "HTTP/1.1 409 Conflict\r\n",
      Status::Gone => "HTTP/1.1 410 Gone\r\n",
      Status::LengthRequired => "HTTP/1.1 411 Length Required\r\n",
      Status::PreconditionFailed => "HTTP/1.1 412 Precondition Failed\r\n",
      Status::PayloadTooLarge => "HTTP/1.1 413 Payload Too Large\r\n",
      Status::ExpectationFailed => "HTTP/1.1 417 Expectation Failed\r\n",
      Status::InternalServerError => "HTTP/1.1 500 Internal Server Error\r\n",
      Status::NotImplemented => "HTTP/1.1 501 Not Implemented\r\n",
      Status::BadGateway => "HTTP/1.1 502 Bad Gateway\r\n",
      Status::ServiceUnavailable => "HTTP/1.1 503 Service Unavailable\r\n",
      Status::VersionNotSupported => "HTTP/1.1 505 Version Not Supported\r\n",
    }
  }

  pub(crate) fn reason(self) -> &'static str {
    // the phrase between the code and CRLF of the status line
    let line = self.status_line();
    &line[13..line.len() - 2]
  }

  /// True for the statuses that continue a multipart upload.
  pub(crate) fn is_success(self) -> bool {
    matches!(
      self,
      Status::Ok | Status::Created | Status::Accepted | Status::NoContent
    )
  }
}

/// The reply to be sent back to the client.
///
/// User handlers write the body into `content` and finalise with one of the
/// `send*` verbs; nothing is put on the wire until a verb marks the reply
/// ready.
pub struct Reply {
  pub(crate) status: Status,
  pub(crate) headers: Vec<Header>,
  /// Content to be sent in the reply.
  pub content: Vec<u8>,
  /// File path the default file flow will open; pre-set to the decoded
  /// request path.
  pub file_path: String,
  pub(crate) return_to_client: bool,
  pub(crate) content_static: Option<&'static [u8]>,
  pub(crate) reply_partial: bool,
  pub(crate) final_part: bool,
  pub(crate) no_body_bytes_received: usize,
  pub(crate) is_multipart: bool,
  pub(crate) last_open_write_id: String,
  pub(crate) multipart_parser: MultipartParser,
  pub(crate) multipart_counter: usize,
  pub(crate) stream_callback: Option<StreamCallback>,
  pub(crate) total_stream_size: usize,
  pub(crate) streamed_bytes: usize,
  pub(crate) use_chunked_encoding: bool,
  pub(crate) max_content_size: usize,
}

impl Reply {
  pub(crate) fn new(max_content_size: usize) -> Self {
    Self {
      status: Status::Ok,
      headers: Vec::with_capacity(2),
      content: Vec::with_capacity(max_content_size),
      file_path: String::new(),
      return_to_client: false,
      content_static: None,
      reply_partial: false,
      final_part: false,
      no_body_bytes_received: 0,
      is_multipart: false,
      last_open_write_id: String::new(),
      multipart_parser: MultipartParser::new(),
      multipart_counter: 0,
      stream_callback: None,
      total_stream_size: 0,
      streamed_bytes: 0,
      use_chunked_encoding: false,
      max_content_size,
    }
  }

  pub(crate) fn reset(&mut self) {
    self.status = Status::Ok;
    self.headers.clear();
    self.content.clear();
    self.file_path.clear();
    self.return_to_client = false;
    self.content_static = None;
    self.reply_partial = false;
    self.final_part = false;
    self.no_body_bytes_received = 0;
    self.is_multipart = false;
    self.last_open_write_id.clear();
    self.multipart_parser.reset();
    self.multipart_counter = 0;
    self.stream_callback = None;
    self.total_stream_size = 0;
    self.streamed_bytes = 0;
    self.use_chunked_encoding = false;
  }

  pub fn status(&self) -> Status {
    self.status
  }

  pub fn add_header(&mut self, name: &str, value: &str) {
    self.headers.push(Header {
      name: name.to_string(),
      value: value.to_string(),
    });
  }

  pub fn has_headers(&self) -> bool {
    !self.headers.is_empty()
  }

  /// Value of the first header matching `name` (case-insensitive), or "".
  pub fn header_value(&self, name: &str) -> &str {
    self
      .headers
      .iter()
      .find(|h| h.name.eq_ignore_ascii_case(name))
      .map(|h| h.value.as_str())
      .unwrap_or("")
  }

  /// Finalise a bodyless reply. Statuses below 200 and 204 No Content get
  /// no Content-Length at all.
  pub fn send(&mut self, status: Status) {
    self.status = status;
    if status.code() < 200 || status == Status::NoContent {
      self.content.clear();
    } else {
      self.add_header("Content-Length", "0");
    }
    self.return_to_client = true;
  }

  /// Finalise with the body previously written into `content`.
  pub fn send_content(&mut self, status: Status, content_type: &str) {
    self.status = status;
    let length = self.content.len().to_string();
    self.add_header("Content-Length", &length);
    self.add_header("Content-Type", content_type);
    self.return_to_client = true;
  }

  /// Finalise with a caller-owned static region, written without copying.
  pub fn send_static(
    &mut self,
    status: Status,
    content_type: &str,
    data: &'static [u8],
  ) {
    self.status = status;
    self.add_header("Content-Length", &data.len().to_string());
    self.add_header("Content-Type", content_type);
    self.content_static = Some(data);
    self.return_to_client = true;
  }

  /// Finalise a reply of known total size whose body is pulled from
  /// `callback` one buffer at a time.
  pub fn send_big(
    &mut self,
    status: Status,
    content_type: &str,
    total_size: usize,
    callback: StreamCallback,
  ) {
    self.status = status;
    self.add_header("Content-Length", &total_size.to_string());
    self.add_header("Content-Type", content_type);
    self.total_stream_size = total_size;
    self.stream_callback = Some(callback);
    self.return_to_client = true;
  }

  /// Finalise a reply of unknown size; the body is pulled from `callback`
  /// and sent with chunked transfer-encoding.
  pub fn send_streaming(
    &mut self,
    status: Status,
    content_type: &str,
    callback: StreamCallback,
  ) {
    self.status = status;
    self.add_header("Transfer-Encoding", "chunked");
    self.add_header("Content-Type", content_type);
    self.use_chunked_encoding = true;
    self.stream_callback = Some(callback);
    self.return_to_client = true;
  }

  /// Canonical server-assembled reply: a JSON error body, `Connection:
  /// close` on non-2xx, body stripped for HEAD requests.
  pub fn stock_reply(&mut self, req: &Request, status: Status) {
    self.status = status;
    self.headers.clear();
    self.content.clear();
    self.content.extend_from_slice(
      format!(
        "{{\"status\":{},\"message\":\"{}\"}}",
        status.code(),
        status.reason()
      )
      .as_bytes(),
    );
    if status == Status::NoContent {
      self.content.clear();
    } else {
      let length = self.content.len().to_string();
      self.add_header("Content-Length", &length);
    }
    self.add_header("Content-Type", "application/json");

    if !status.is_success() {
      self.add_header("Connection", "close");
    }

    if req.method == "HEAD" {
      self.content.clear();
    }
    self.return_to_client = true;
  }

  /// Serialise the status line and headers, including the final blank
  /// line.
  pub(crate) fn serialize_headers(&self, buf: &mut BytesMut) {
    buf.put_slice(self.status.status_line().as_bytes());
    for header in &self.headers {
      buf.put_slice(header.name.as_bytes());
      buf.put_slice(b": ");
      buf.put_slice(header.value.as_bytes());
      buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
  }

  /// Wrap the current content in chunked transfer-encoding framing:
  /// hex length CRLF, data, CRLF.
  pub(crate) fn wrap_content_in_chunk_format(&mut self) {
    let header = format!("{:x}\r\n", self.content.len());
    let mut framed = Vec::with_capacity(header.len() + self.content.len() + 2);
    framed.extend_from_slice(header.as_bytes());
    framed.append(&mut self.content);
    framed.extend_from_slice(b"\r\n");
    self.content = framed;
  }
}

/// Terminal chunk of a chunked-encoded reply.
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[cfg(test)]
mod tests {
  use super::*;

  fn get_request() -> Request {
    let mut req = Request::new();
    req.method = "GET".to_string();
    req
  }

  #[test]
  fn status_lines_are_exact() {
    assert_eq!(Status::Ok.status_line(), "HTTP/1.1 200 OK\r\n");
    assert_eq!(
      Status::SwitchingProtocols.status_line(),
      "HTTP/1.1 101 Switching Protocols\r\n"
    );
    assert_eq!(
      Status::MovedTemporarily.status_line(),
      "HTTP/1.1 302 Moved Temporarily\r\n"
    );
    assert_eq!(
      Status::VersionNotSupported.status_line(),
      "HTTP/1.1 505 Version Not Supported\r\n"
    );
  }

  #[test]
  fn reason_phrases() {
    assert_eq!(Status::Ok.reason(), "OK");
    assert_eq!(Status::NotFound.reason(), "Not Found");
    assert_eq!(Status::LengthRequired.reason(), "Length Required");
  }

  #[test]
  fn stock_reply_has_json_body_and_close() {
    let mut reply = Reply::new(1024);
    reply.stock_reply(&get_request(), Status::NotFound);
    assert_eq!(reply.status(), Status::NotFound);
    assert_eq!(reply.content, br#"{"status":404,"message":"Not Found"}"#);
    assert_eq!(reply.header_value("Content-Type"), "application/json");
    assert_eq!(reply.header_value("Content-Length"), "36");
    assert_eq!(reply.header_value("Connection"), "close");
  }

  #[test]
  fn stock_reply_2xx_keeps_connection_open() {
    let mut reply = Reply::new(1024);
    reply.stock_reply(&get_request(), Status::Ok);
    assert_eq!(reply.header_value("Connection"), "");
  }

  #[test]
  fn stock_reply_strips_body_for_head() {
    let mut req = get_request();
    req.method = "HEAD".to_string();
    let mut reply = Reply::new(1024);
    reply.stock_reply(&req, Status::NotFound);
    assert!(reply.content.is_empty());
    // Content-Length still reflects the stripped body
    assert_eq!(reply.header_value("Content-Length"), "36");
  }

  #[test]
  fn send_without_body_sets_zero_content_length() {
    let mut reply = Reply::new(1024);
    reply.send(Status::Ok);
    assert_eq!(reply.header_value("Content-Length"), "0");
    assert!(reply.return_to_client);
  }

  #[test]
  fn send_1xx_and_204_have_no_content_length() {
    let mut reply = Reply::new(1024);
    reply.content.extend_from_slice(b"leftover");
    reply.send(Status::NoContent);
    assert!(reply.content.is_empty());
    assert_eq!(reply.header_value("Content-Length"), "");

    let mut reply = Reply::new(1024);
    reply.send(Status::SwitchingProtocols);
    assert_eq!(reply.header_value("Content-Length"), "");
  }

  #[test]
  fn send_content_uses_written_body() {
    let mut reply = Reply::new(1024);
    reply.content.extend_from_slice(b"hello world");
    reply.send_content(Status::Ok, "text/plain");
    assert_eq!(reply.header_value("Content-Length"), "11");
    assert_eq!(reply.header_value("Content-Type"), "text/plain");
  }

  #[test]
  fn send_static_keeps_external_region() {
    static BLOB: &[u8] = b"firmware image";
    let mut reply = Reply::new(1024);
    reply.send_static(Status::Ok, "application/octet-stream", BLOB);
    assert_eq!(reply.header_value("Content-Length"), "14");
    assert_eq!(reply.content_static, Some(BLOB));
    assert!(reply.content.is_empty());
  }

  #[test]
  fn serialized_headers_end_with_blank_line() {
    let mut reply = Reply::new(1024);
    reply.content.extend_from_slice(b"x");
    reply.send_content(Status::Ok, "text/plain");
    let mut buf = BytesMut::new();
    reply.serialize_headers(&mut buf);
    let text = String::from_utf8(buf.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 1\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
  }

  #[test]
  fn chunk_format_wraps_hex_length() {
    let mut reply = Reply::new(1024);
    reply.content.extend_from_slice(&vec![b'a'; 26]);
    reply.wrap_content_in_chunk_format();
    let mut expected = b"1a\r\n".to_vec();
    expected.extend_from_slice(&vec![b'a'; 26]);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(reply.content, expected);
  }

  #[test]
  fn send_streaming_declares_chunked_encoding() {
    let mut reply = Reply::new(1024);
    reply.send_streaming(Status::Ok, "text/csv", Box::new(|_, _| 0));
    assert!(reply.use_chunked_encoding);
    assert_eq!(reply.header_value("Transfer-Encoding"), "chunked");
    assert_eq!(reply.header_value("Content-Length"), "");
  }
}
