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

/// A single HTTP header as it appeared on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
  pub name: String,
  pub value: String,
}

/// A request received from a client.
///
/// The same instance is reused for every request on a keep-alive connection;
/// it is reset before each parse.
#[derive(Debug, Default)]
pub struct Request {
  pub method: String,
  /// The raw, undecoded request target.
  pub uri: String,
  pub http_version_major: u32,
  pub http_version_minor: u32,
  /// Headers in wire order.
  pub headers: Vec<Header>,
  /// URL-decoded path, without the query string.
  pub request_path: String,
  pub query_params: Vec<(String, String)>,
  pub form_params: Vec<(String, String)>,
  /// Request body, capped at the connection's `max_content_size`. Bodies
  /// larger than that are streamed and only the initial part is visible
  /// here.
  pub body: Vec<u8>,
  /// Value of the Content-Length header, for methods that carry a body.
  pub content_length: usize,
  pub keep_alive: bool,
  pub(crate) expects_continue: bool,
  pub(crate) no_initial_body_bytes: usize,
}

impl Request {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn reset(&mut self) {
    self.method.clear();
    self.uri.clear();
    self.http_version_major = 0;
    self.http_version_minor = 0;
    self.headers.clear();
    self.request_path.clear();
    self.query_params.clear();
    self.form_params.clear();
    self.body.clear();
    self.content_length = 0;
    self.keep_alive = false;
    self.expects_continue = false;
    self.no_initial_body_bytes = 0;
  }

  /// Value of the first header matching `name` (case-insensitive), or ""
  /// when absent.
  pub fn header_value(&self, name: &str) -> &str {
    self
      .headers
      .iter()
      .find(|h| h.name.eq_ignore_ascii_case(name))
      .map(|h| h.value.as_str())
      .unwrap_or("")
  }

  /// Value of the first query parameter matching `key`.
  pub fn query_value(&self, key: &str) -> Option<&str> {
    self
      .query_params
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// True when the client sent `Expect: 100-continue`.
  pub fn expects_continue(&self) -> bool {
    self.expects_continue
  }

  pub(crate) fn no_initial_body_bytes(&self) -> usize {
    self.no_initial_body_bytes
  }

  /// Decode the raw URI into `request_path`, `query_params` and, for form
  /// posts, `form_params`. Returns false for paths that are unsafe to hand
  /// to a file sink.
  pub(crate) fn decode(&mut self, content: &[u8]) -> bool {
    self.request_path = url_decode(self.uri.as_bytes());

    // request path must be absolute and not contain ".."
    if self.request_path.is_empty()
      || !self.request_path.starts_with('/')
      || self.request_path.contains("..")
    {
      return false;
    }

    if let Some(pos) = self.request_path.find('?') {
      let query = self.request_path[pos + 1..].to_string();
      key_val_decode(&query, &mut self.query_params);
      self.request_path.truncate(pos);
    }

    if self.method != "GET"
      && self
        .header_value("Content-Type")
        .eq_ignore_ascii_case("application/x-www-form-urlencoded")
    {
      let body = url_decode(content);
      key_val_decode(&body, &mut self.form_params);
    }

    true
  }
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes are passed
/// through verbatim.
pub(crate) fn url_decode(input: &[u8]) -> String {
  let mut out = Vec::with_capacity(input.len());
  let mut i = 0;
  while i < input.len() {
    match input[i] {
      b'%' if i + 2 < input.len() => {
        let hex = std::str::from_utf8(&input[i + 1..i + 3]).ok();
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
          Some(byte) => {
            out.push(byte);
            i += 2;
          }
          None => out.push(b'%'),
        }
      }
      b'+' => out.push(b' '),
      c => out.push(c),
    }
    i += 1;
  }
  String::from_utf8_lossy(&out).into_owned()
}

/// Split `key=val&key=val` pairs.
pub(crate) fn key_val_decode(input: &str, params: &mut Vec<(String, String)>) {
  let mut segments = input.split('&').peekable();
  while let Some(segment) = segments.next() {
    // a trailing '&' leaves an empty final segment, which is not a pair
    if segment.is_empty() && segments.peek().is_none() {
      break;
    }
    match segment.split_once('=') {
      Some((k, v)) => params.push((k.to_string(), v.to_string())),
      None => params.push((segment.to_string(), String::new())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request_with_uri(uri: &str) -> Request {
    let mut req = Request::new();
    req.method = "GET".to_string();
    req.uri = uri.to_string();
    req
  }

  #[test]
  fn decodes_plain_path() {
    let mut req = request_with_uri("/index.html");
    assert!(req.decode(&[]));
    assert_eq!(req.request_path, "/index.html");
    assert!(req.query_params.is_empty());
  }

  #[test]
  fn decodes_escapes_and_plus() {
    let mut req = request_with_uri("/my%20file+1.txt");
    assert!(req.decode(&[]));
    assert_eq!(req.request_path, "/my file 1.txt");
  }

  #[test]
  fn splits_query_params() {
    let mut req = request_with_uri("/file.bin?myKey=myVal&flag=&x=%21");
    assert!(req.decode(&[]));
    assert_eq!(req.request_path, "/file.bin");
    assert_eq!(req.query_value("myKey"), Some("myVal"));
    assert_eq!(req.query_value("flag"), Some(""));
    assert_eq!(req.query_value("x"), Some("!"));
  }

  #[test]
  fn rejects_relative_and_traversal_paths() {
    assert!(!request_with_uri("../secret").decode(&[]));
    assert!(!request_with_uri("/a/../b").decode(&[]));
    assert!(!request_with_uri("").decode(&[]));
  }

  #[test]
  fn decodes_form_body_for_posts() {
    let mut req = request_with_uri("/submit");
    req.method = "POST".to_string();
    req.headers.push(Header {
      name: "Content-Type".to_string(),
      value: "application/x-www-form-urlencoded".to_string(),
    });
    assert!(req.decode(b"name=the%20user&age=42"));
    assert_eq!(req.form_params.len(), 2);
    assert_eq!(req.form_params[0], ("name".to_string(), "the user".to_string()));
    assert_eq!(req.form_params[1], ("age".to_string(), "42".to_string()));
  }

  #[test]
  fn header_lookup_is_case_insensitive() {
    let mut req = request_with_uri("/");
    req.headers.push(Header {
      name: "Content-Length".to_string(),
      value: "42".to_string(),
    });
    assert_eq!(req.header_value("content-length"), "42");
    assert_eq!(req.header_value("Missing"), "");
  }
}
