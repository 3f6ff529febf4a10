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

use crate::request::{Header, Request};

/// Result of a parse step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
  /// A complete request (headers and full body, if any) has been consumed.
  GoodComplete,
  /// Headers are complete but only part of the body has been received.
  /// The accumulated body chunk is left compacted in the buffer.
  GoodPart,
  /// Headers carried `Expect: 100-continue` and no body byte has been
  /// consumed yet.
  GoodHeadersExpectContinue,
  /// Protocol violation: `Expect: 100-continue` arrived together with body
  /// bytes.
  ExpectContinueWithBody,
  /// A well-formed WebSocket upgrade request (RFC 6455 §4.2.1).
  UpgradeToWebsocket,
  Bad,
  VersionNotSupported,
  /// POST/PUT/PATCH without a Content-Length header.
  MissingContentLength,
  /// `Transfer-Encoding: chunked` request bodies are not decoded.
  NotImplemented,
  /// More data is required.
  Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  MethodStart,
  Method,
  UriStart,
  Uri,
  VersionH,
  VersionT1,
  VersionT2,
  VersionP,
  VersionSlash,
  VersionMajorStart,
  VersionMajor,
  VersionMinorStart,
  VersionMinor,
  ExpectingNewline1,
  HeaderLineStart,
  HeaderLws,
  HeaderName,
  SpaceBeforeHeaderValue,
  HeaderValue,
  ExpectingNewline2,
  ExpectingNewline3,
  Body,
}

/// Incremental parser for incoming requests.
///
/// Bytes are consumed one at a time out of the connection's receive buffer.
/// Header bytes are moved into the `Request` as they are recognised; body
/// bytes are compacted to the front of the buffer so that after each call
/// the buffer holds exactly the body bytes accepted so far.
pub struct RequestParser {
  state: State,
  max_content_size: usize,
  body_received: usize,
  body_pos: usize,
}

impl RequestParser {
  pub fn new(max_content_size: usize) -> Self {
    Self {
      state: State::MethodStart,
      max_content_size,
      body_received: 0,
      body_pos: 0,
    }
  }

  /// Reset to the initial parser state.
  pub fn reset(&mut self) {
    self.state = State::MethodStart;
    self.body_received = 0;
    self.body_pos = 0;
  }

  /// Total body bytes accepted so far for the current request.
  pub fn body_bytes_received(&self) -> usize {
    self.body_received
  }

  /// True when no byte of the current request has been consumed yet.
  pub fn at_start(&self) -> bool {
    self.state == State::MethodStart
  }

  /// Consume `content[start..]`. Bytes before `start` are body bytes kept
  /// from previous calls. On return the buffer has been truncated to the
  /// accumulated body chunk (empty while headers are still incomplete).
  pub fn parse(
    &mut self,
    req: &mut Request,
    content: &mut Vec<u8>,
    start: usize,
  ) -> ParseResult {
    self.body_pos = if self.state == State::Body { start } else { 0 };

    let mut result = ParseResult::Indeterminate;
    let mut i = start;
    while i < content.len() {
      result = self.consume(req, content, i);
      i += 1;
      if result != ParseResult::Indeterminate {
        break;
      }
    }

    // Out of input while in the body: the accumulated bytes form a
    // deliverable chunk.
    if result == ParseResult::Indeterminate && self.state == State::Body {
      result = ParseResult::GoodPart;
    }

    content.truncate(self.body_pos);
    result
  }

  fn consume(
    &mut self,
    req: &mut Request,
    content: &mut Vec<u8>,
    i: usize,
  ) -> ParseResult {
    use ParseResult::*;
    let input = content[i];

    match self.state {
      State::MethodStart => {
        if !is_char(input) || is_ctl(input) || is_tspecial(input) {
          return Bad;
        }
        self.state = State::Method;
        req.method.push(input as char);
        Indeterminate
      }
      State::Method => {
        if input == b' ' {
          self.state = State::UriStart;
        } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
          return Bad;
        } else {
          req.method.push(input as char);
        }
        Indeterminate
      }
      State::UriStart => {
        if is_ctl(input) {
          return Bad;
        }
        self.state = State::Uri;
        req.uri.push(input as char);
        Indeterminate
      }
      State::Uri => {
        if input == b' ' {
          self.state = State::VersionH;
        } else if input == b'\r' {
          // no version token at all: HTTP/0.9 simple request
          req.http_version_major = 0;
          req.http_version_minor = 9;
          return GoodComplete;
        } else if is_ctl(input) {
          return Bad;
        } else {
          req.uri.push(input as char);
        }
        Indeterminate
      }
      State::VersionH => self.expect(input, b'H', State::VersionT1),
      State::VersionT1 => self.expect(input, b'T', State::VersionT2),
      State::VersionT2 => self.expect(input, b'T', State::VersionP),
      State::VersionP => self.expect(input, b'P', State::VersionSlash),
      State::VersionSlash => {
        if input != b'/' {
          return Bad;
        }
        req.http_version_major = 0;
        req.http_version_minor = 0;
        self.state = State::VersionMajorStart;
        Indeterminate
      }
      State::VersionMajorStart => {
        if !input.is_ascii_digit() {
          return Bad;
        }
        req.http_version_major = u32::from(input - b'0');
        self.state = State::VersionMajor;
        Indeterminate
      }
      State::VersionMajor => {
        if input == b'.' {
          self.state = State::VersionMinorStart;
        } else if input.is_ascii_digit() {
          req.http_version_major =
            req.http_version_major * 10 + u32::from(input - b'0');
        } else {
          return Bad;
        }
        Indeterminate
      }
      State::VersionMinorStart => {
        if !input.is_ascii_digit() {
          return Bad;
        }
        req.http_version_minor = u32::from(input - b'0');
        self.state = State::VersionMinor;
        Indeterminate
      }
      State::VersionMinor => {
        if input == b'\r' {
          self.state = State::ExpectingNewline1;
        } else if input.is_ascii_digit() {
          req.http_version_minor =
            req.http_version_minor * 10 + u32::from(input - b'0');
        } else {
          return Bad;
        }
        Indeterminate
      }
      State::ExpectingNewline1 => self.expect(input, b'\n', State::HeaderLineStart),
      State::HeaderLineStart => {
        if input == b'\r' {
          self.state = State::ExpectingNewline3;
        } else if !req.headers.is_empty() && (input == b' ' || input == b'\t') {
          self.state = State::HeaderLws;
        } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
          return Bad;
        } else {
          let mut header = Header::default();
          header.name.reserve(16);
          header.value.reserve(16);
          header.name.push(input as char);
          req.headers.push(header);
          self.state = State::HeaderName;
        }
        Indeterminate
      }
      State::HeaderLws => {
        if input == b'\r' {
          self.state = State::ExpectingNewline2;
        } else if input == b' ' || input == b'\t' {
          // skip
        } else if is_ctl(input) {
          return Bad;
        } else {
          self.state = State::HeaderValue;
          self.push_header_value(req, input);
        }
        Indeterminate
      }
      State::HeaderName => {
        if input == b':' {
          self.state = State::SpaceBeforeHeaderValue;
        } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
          return Bad;
        } else if let Some(h) = req.headers.last_mut() {
          h.name.push(input as char);
        }
        Indeterminate
      }
      State::SpaceBeforeHeaderValue => self.expect(input, b' ', State::HeaderValue),
      State::HeaderValue => {
        if input == b'\r' {
          self.state = State::ExpectingNewline2;
        } else if is_ctl(input) {
          return Bad;
        } else {
          self.push_header_value(req, input);
        }
        Indeterminate
      }
      State::ExpectingNewline2 => self.expect(input, b'\n', State::HeaderLineStart),
      State::ExpectingNewline3 => {
        if input != b'\n' {
          return Bad;
        }
        self.check_request_after_all_headers(req, content, i)
      }
      State::Body => {
        content[self.body_pos] = input;
        self.body_pos += 1;
        self.body_received += 1;
        req.no_initial_body_bytes = self.body_received;
        if self.body_received == req.content_length {
          return GoodComplete;
        }
        if self.body_pos == self.max_content_size {
          return GoodPart;
        }
        Indeterminate
      }
    }
  }

  fn expect(&mut self, input: u8, wanted: u8, next: State) -> ParseResult {
    if input != wanted {
      return ParseResult::Bad;
    }
    self.state = next;
    ParseResult::Indeterminate
  }

  fn push_header_value(&self, req: &mut Request, input: u8) {
    if let Some(h) = req.headers.last_mut() {
      h.value.push(input as char);
    }
  }

  /// Runs once the terminating CRLF of the header section is consumed;
  /// `i` is the index of that final `\n`.
  fn check_request_after_all_headers(
    &mut self,
    req: &mut Request,
    content: &[u8],
    i: usize,
  ) -> ParseResult {
    use ParseResult::*;

    if req.http_version_major > 1 {
      return VersionNotSupported;
    }

    // explicit Connection header wins; absence defaults to keep-alive for
    // HTTP/1.1 and newer
    let connection = req.header_value("Connection").to_string();
    if connection.is_empty() {
      req.keep_alive = req.http_version_major == 1 && req.http_version_minor >= 1;
    } else {
      req.keep_alive = connection.eq_ignore_ascii_case("keep-alive");
    }

    if req.method == "GET"
      && req.header_value("Upgrade").eq_ignore_ascii_case("websocket")
      && contains_token(&connection, "upgrade")
      && !req.header_value("Sec-WebSocket-Key").is_empty()
      && req.header_value("Sec-WebSocket-Version").trim() == "13"
    {
      return UpgradeToWebsocket;
    }

    if matches!(req.method.as_str(), "POST" | "PUT" | "PATCH") {
      if req
        .header_value("Transfer-Encoding")
        .eq_ignore_ascii_case("chunked")
      {
        if req.http_version_major < 1
          || (req.http_version_major == 1 && req.http_version_minor < 1)
        {
          // chunked encoding did not exist before HTTP/1.1
          return Bad;
        }
        return NotImplemented;
      }

      let content_length = req.header_value("Content-Length");
      if content_length.is_empty() {
        return MissingContentLength;
      }
      match content_length.trim().parse::<usize>() {
        Ok(len) => req.content_length = len,
        Err(_) => return Bad,
      }
    }

    if req.expects_continue_header() && req.content_length > 0 {
      req.expects_continue = true;
      self.state = State::Body;
      if i + 1 < content.len() {
        return ExpectContinueWithBody;
      }
      return GoodHeadersExpectContinue;
    }

    if req.content_length == 0 {
      return GoodComplete;
    }
    self.state = State::Body;
    Indeterminate
  }
}

impl Request {
  fn expects_continue_header(&self) -> bool {
    self.header_value("Expect").eq_ignore_ascii_case("100-continue")
  }
}

/// True when `list` contains `token` as a comma-separated element
/// (case-insensitive), as in `Connection: keep-alive, Upgrade`.
fn contains_token(list: &str, token: &str) -> bool {
  list
    .split(',')
    .any(|part| part.trim().eq_ignore_ascii_case(token))
}

// Character classes of RFC 2616.
fn is_char(c: u8) -> bool {
  c < 128
}

fn is_ctl(c: u8) -> bool {
  c <= 31 || c == 127
}

fn is_tspecial(c: u8) -> bool {
  matches!(
    c,
    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
      | b'[' | b']' | b'?' | b'=' | b'{' | b'}' | b' ' | b'\t'
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixture {
    parser: RequestParser,
    request: Request,
    content: Vec<u8>,
    max: usize,
  }

  impl Fixture {
    fn new(max_content_size: usize) -> Self {
      Self {
        parser: RequestParser::new(max_content_size),
        request: Request::new(),
        content: Vec::with_capacity(max_content_size),
        max: max_content_size,
      }
    }

    fn parse(&mut self, text: &str) -> ParseResult {
      let take = text.len().min(self.max);
      self.content.extend_from_slice(&text.as_bytes()[..take]);
      self.parser.parse(&mut self.request, &mut self.content, 0)
    }

    /// Feed `text` in pieces of `chunk` bytes, carrying the accumulated
    /// body between calls the way the connection does.
    fn parse_chunked(&mut self, text: &str, chunk: usize) -> ParseResult {
      let mut result = ParseResult::Indeterminate;
      for piece in text.as_bytes().chunks(chunk) {
        let start = self.content.len();
        self.content.extend_from_slice(piece);
        result = self.parser.parse(&mut self.request, &mut self.content, start);
        if !matches!(result, ParseResult::Indeterminate | ParseResult::GoodPart) {
          return result;
        }
      }
      result
    }
  }

  #[test]
  fn rejects_misspelled_version() {
    let mut f = Fixture::new(1024);
    assert_eq!(f.parse("GET /uri HTTTP/0.9\r\n\r\n"), ParseResult::Bad);
  }

  #[test]
  fn parses_http_0_9_simple_request() {
    let mut f = Fixture::new(1024);
    assert_eq!(f.parse("GET /uri\r\n"), ParseResult::GoodComplete);
    assert_eq!(f.request.method, "GET");
    assert_eq!(f.request.uri, "/uri");
    assert_eq!(f.request.http_version_major, 0);
    assert_eq!(f.request.http_version_minor, 9);
  }

  #[test]
  fn parses_get_http_1_0() {
    let mut f = Fixture::new(1024);
    assert_eq!(f.parse("GET /uri HTTP/1.0\r\n\r\n"), ParseResult::GoodComplete);
    assert_eq!(f.request.http_version_major, 1);
    assert_eq!(f.request.http_version_minor, 0);
    assert!(!f.request.keep_alive);
  }

  #[test]
  fn parses_get_http_1_1() {
    let mut f = Fixture::new(1024);
    assert_eq!(f.parse("GET /uri HTTP/1.1\r\n\r\n"), ParseResult::GoodComplete);
    assert_eq!(f.request.method, "GET");
    assert_eq!(f.request.uri, "/uri");
    assert!(f.request.keep_alive);
  }

  #[test]
  fn parses_uri_with_query_params() {
    let mut f = Fixture::new(1024);
    let result = f.parse("GET /uri?arg1=test&arg1=%20%21&arg3=test HTTP/1.1\r\n\r\n");
    assert_eq!(result, ParseResult::GoodComplete);
    assert_eq!(f.request.uri, "/uri?arg1=test&arg1=%20%21&arg3=test");
  }

  #[test]
  fn honours_connection_close_on_1_1() {
    let mut f = Fixture::new(1024);
    let result = f.parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(result, ParseResult::GoodComplete);
    assert!(!f.request.keep_alive);
  }

  #[test]
  fn honours_connection_keep_alive_on_1_0() {
    let mut f = Fixture::new(1024);
    let result = f.parse("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(result, ParseResult::GoodComplete);
    assert!(f.request.keep_alive);
  }

  #[test]
  fn parses_header_fields() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /uri HTTP/1.1\r\n\
       X-Custom-Header: header value\r\n\
       Content-Length: 0\r\n\
       \r\n",
    );
    assert_eq!(result, ParseResult::GoodComplete);
    assert_eq!(f.request.headers.len(), 2);
    assert_eq!(f.request.headers[0].name, "X-Custom-Header");
    assert_eq!(f.request.headers[0].value, "header value");
  }

  #[test]
  fn folds_continuation_lines() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "GET / HTTP/1.1\r\n\
       X-Folded: one\r\n\
       \t two\r\n\
       \r\n",
    );
    assert_eq!(result, ParseResult::GoodComplete);
    assert_eq!(f.request.headers.len(), 1);
    assert_eq!(f.request.headers[0].value, "onetwo");
  }

  #[test]
  fn parses_post_with_body() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /uri.cgi HTTP/1.1\r\n\
       From: user@example.com\r\n\
       Content-Type: application/x-www-form-urlencoded\r\n\
       Content-Length: 31\r\n\
       \r\n\
       arg1=test;arg1=%20%21;arg3=test",
    );
    assert_eq!(result, ParseResult::GoodComplete);
    assert_eq!(f.request.content_length, 31);
    assert_eq!(f.content, b"arg1=test;arg1=%20%21;arg3=test");
    assert_eq!(f.request.no_initial_body_bytes(), 31);
  }

  #[test]
  fn missing_content_length_on_post() {
    let mut f = Fixture::new(1024);
    let result = f.parse("POST /upload HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(result, ParseResult::MissingContentLength);
  }

  #[test]
  fn chunked_request_body_is_not_implemented() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /uri.cgi HTTP/1.1\r\n\
       Content-Type: text/plain\r\n\
       Transfer-Encoding: chunked\r\n\
       \r\n\
       24\r\nThis is the data in the first chunk \r\n0\r\n\r\n",
    );
    assert_eq!(result, ParseResult::NotImplemented);
  }

  #[test]
  fn chunked_on_http_1_0_is_bad() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /uri HTTP/1.0\r\nTransfer-Encoding: chunked\r\n\r\n",
    );
    assert_eq!(result, ParseResult::Bad);
  }

  #[test]
  fn http_2_is_not_supported() {
    let mut f = Fixture::new(1024);
    let result = f.parse("GET / HTTP/2.0\r\n\r\n");
    assert_eq!(result, ParseResult::VersionNotSupported);
  }

  #[test]
  fn body_larger_than_buffer_gives_good_part() {
    let mut f = Fixture::new(320);
    let result = f.parse(
      "POST / HTTP/1.1\r\n\
       From: user@example.com\r\n\
       User-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36\r\n\
       Accept: */*\r\n\
       Accept-Encoding: gzip, deflate\r\n\
       Content-Type: multipart/form-data; boundary=----WebKitFormBoundarylSu7ajtLodoq9XHE\r\n\
       Content-Length: 420\r\n\
       \r\n\
       This request includes headers and some body data (this text) that does not fit the input content buffer of 320 bytes.",
    );
    assert_eq!(result, ParseResult::GoodPart);
    assert_eq!(f.content, b"This request");
    assert_eq!(f.request.no_initial_body_bytes(), b"This request".len());
  }

  #[test]
  fn expect_continue_stops_before_body() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /upload HTTP/1.1\r\n\
       Expect: 100-continue\r\n\
       Content-Length: 11\r\n\
       \r\n",
    );
    assert_eq!(result, ParseResult::GoodHeadersExpectContinue);
    assert!(f.request.expects_continue());
    assert!(f.content.is_empty());

    // body arrives afterwards
    f.content.extend_from_slice(b"hello world");
    let result = f.parser.parse(&mut f.request, &mut f.content, 0);
    assert_eq!(result, ParseResult::GoodComplete);
    assert_eq!(f.content, b"hello world");
  }

  #[test]
  fn expect_continue_with_body_is_a_violation() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "POST /upload HTTP/1.1\r\n\
       Expect: 100-continue\r\n\
       Content-Length: 11\r\n\
       \r\n\
       hello world",
    );
    assert_eq!(result, ParseResult::ExpectContinueWithBody);
  }

  #[test]
  fn detects_websocket_upgrade() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "GET /ws/chat HTTP/1.1\r\n\
       Host: h\r\n\
       Upgrade: websocket\r\n\
       Connection: keep-alive, Upgrade\r\n\
       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
       Sec-WebSocket-Version: 13\r\n\
       \r\n",
    );
    assert_eq!(result, ParseResult::UpgradeToWebsocket);
  }

  #[test]
  fn upgrade_without_key_is_not_an_upgrade() {
    let mut f = Fixture::new(1024);
    let result = f.parse(
      "GET /ws HTTP/1.1\r\n\
       Upgrade: websocket\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Version: 13\r\n\
       \r\n",
    );
    assert_eq!(result, ParseResult::GoodComplete);
  }

  // Feeding one byte at a time must converge to the same request and body
  // as a single-shot parse.
  #[test]
  fn byte_at_a_time_equals_all_at_once() {
    let text = "POST /uri.cgi HTTP/1.1\r\n\
                From: user@example.com\r\n\
                Content-Length: 12\r\n\
                \r\n\
                Hello bodies";

    let mut whole = Fixture::new(1024);
    let whole_result = whole.parse(text);

    let mut single = Fixture::new(1024);
    let single_result = single.parse_chunked(text, 1);

    assert_eq!(whole_result, ParseResult::GoodComplete);
    assert_eq!(single_result, whole_result);
    assert_eq!(single.request.method, whole.request.method);
    assert_eq!(single.request.uri, whole.request.uri);
    assert_eq!(single.request.headers, whole.request.headers);
    assert_eq!(single.request.content_length, whole.request.content_length);
    assert_eq!(single.content, whole.content);
  }

  // Bodies larger than the buffer are delivered across multiple GoodPart
  // chunks whose concatenation equals the original body.
  #[test]
  fn oversized_body_chunks_reassemble() {
    let body: String = "abcdefgh".repeat(400);
    let text = format!(
      "POST /big HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
      body.len(),
      body
    );

    let max = 1024;
    let mut parser = RequestParser::new(max);
    let mut req = Request::new();
    let mut content: Vec<u8> = Vec::with_capacity(max);
    let mut reassembled: Vec<u8> = Vec::new();

    for piece in text.as_bytes().chunks(300) {
      let mut offset = 0;
      while offset < piece.len() {
        let room = max - content.len();
        let take = room.min(piece.len() - offset);
        let start = content.len();
        content.extend_from_slice(&piece[offset..offset + take]);
        offset += take;
        match parser.parse(&mut req, &mut content, start) {
          ParseResult::GoodPart => {
            // the connection processes and discards each chunk
            reassembled.extend_from_slice(&content);
            content.clear();
          }
          ParseResult::GoodComplete => {
            reassembled.extend_from_slice(&content);
            content.clear();
          }
          ParseResult::Indeterminate => {}
          other => panic!("unexpected result: {:?}", other),
        }
      }
    }

    assert_eq!(reassembled, body.as_bytes());
    assert!(content.len() <= max);
  }
}
