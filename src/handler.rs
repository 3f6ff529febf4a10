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
use std::collections::VecDeque;
use std::rc::Rc;

use crate::file_io::FileIO;
use crate::mime;
use crate::multipart::{ContentPart, MultipartResult};
use crate::reply::{Reply, Status};
use crate::request::{Header, Request};
use crate::ws_types::ConnectionId;

/// A user request handler. Handlers run in registration order until one
/// finalises the reply with a `send*` verb.
pub type HandlerCallback = Box<dyn Fn(&Request, &mut Reply)>;

/// Runs the user handler chain and the default file read/write flows.
pub(crate) struct RequestHandler {
  file_io: Option<Rc<RefCell<dyn FileIO>>>,
  request_handlers: Vec<HandlerCallback>,
  expect_continue_cb: Option<HandlerCallback>,
  not_found_cb: Option<HandlerCallback>,
}

impl RequestHandler {
  pub fn new() -> Self {
    Self {
      file_io: None,
      request_handlers: Vec::new(),
      expect_continue_cb: None,
      not_found_cb: None,
    }
  }

  pub fn set_file_io(&mut self, file_io: Rc<RefCell<dyn FileIO>>) {
    self.file_io = Some(file_io);
  }

  pub fn add_request_handler(&mut self, cb: HandlerCallback) {
    self.request_handlers.push(cb);
  }

  pub fn set_expect_continue_handler(&mut self, cb: HandlerCallback) {
    self.expect_continue_cb = Some(cb);
  }

  pub fn set_not_found_handler(&mut self, cb: HandlerCallback) {
    self.not_found_cb = Some(cb);
  }

  /// Ask the user whether a 100-continue body should be accepted. The
  /// default is to accept; a handler rejects by finalising a non-2xx
  /// reply.
  pub fn should_continue_after_headers(&self, req: &Request, rep: &mut Reply) {
    if let Some(cb) = &self.expect_continue_cb {
      cb(req, rep);
    }
  }

  pub fn handle_request(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    content: &mut Vec<u8>,
    rep: &mut Reply,
  ) {
    rep.file_path = req.request_path.clone();

    // a path ending in slash is a directory, serve its index.html
    if req.method == "GET" && rep.file_path.ends_with('/') {
      rep.file_path.push_str("index.html");
    }

    for handler in &self.request_handlers {
      handler(req, rep);
      if rep.return_to_client {
        return;
      }
    }

    if self.file_io.is_some() {
      if req.method == "POST" && rep.multipart_parser.parse_header(req) {
        rep.status = Status::Ok;
        rep.is_multipart = true;
        self.handle_partial_write(connection_id, req, content, rep);
        return;
      }
      if req.method == "GET" && self.open_and_read_file(connection_id, req, rep) {
        return;
      }
    }

    if let Some(not_found) = &self.not_found_cb {
      not_found(req, rep);
      if rep.return_to_client {
        return;
      }
    }
    rep.stock_reply(req, Status::NotFound);
  }

  /// Pull the next file chunk while a partial reply is in flight. A short
  /// read marks the final part and releases the sink.
  pub fn handle_partial_read(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    rep: &mut Reply,
  ) {
    let bytes_read = self.read_from_file(connection_id, req, rep);
    if bytes_read < rep.max_content_size {
      rep.final_part = true;
      if let Some(file_io) = &self.file_io {
        file_io
          .borrow_mut()
          .close_read_file(&connection_id.to_string());
      }
    }
  }

  /// Feed a received body chunk to the multipart parser and write the
  /// emitted parts to the file sink.
  pub fn handle_partial_write(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    content: &mut Vec<u8>,
    rep: &mut Reply,
  ) {
    let mut parts = VecDeque::new();
    let result = rep.multipart_parser.parse(content, &mut parts);

    if result == MultipartResult::Bad {
      rep.stock_reply(req, Status::BadRequest);
      return;
    }

    self.write_file_parts(connection_id, req, rep, &parts, content);

    if result == MultipartResult::Done {
      rep.multipart_parser.flush(content, &mut parts);
      self.write_file_parts(connection_id, req, rep, &parts, content);
    }

    // interim acknowledgements carry headers only
    if rep.status.is_success() {
      rep.content.clear();
    }
  }

  /// Release any file sink state still held for this connection.
  pub fn close_file(&self, connection_id: ConnectionId, rep: &mut Reply) {
    if let Some(file_io) = &self.file_io {
      if !rep.last_open_write_id.is_empty() {
        file_io.borrow_mut().close_write_file(&rep.last_open_write_id);
        rep.last_open_write_id.clear();
      }
      file_io
        .borrow_mut()
        .close_read_file(&connection_id.to_string());
    }
  }

  fn open_and_read_file(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    rep: &mut Reply,
  ) -> bool {
    let Some(file_io) = &self.file_io else {
      return false;
    };
    let id = connection_id.to_string();
    let content_size = file_io.borrow_mut().open_file_for_read(&id, req, rep);
    if content_size == 0 {
      // the sink may already have finalised the reply (404, 304, ...)
      return rep.return_to_client;
    }

    // if a directory was requested the extension comes from index.html
    let extension = if req.request_path.ends_with('/') {
      "html".to_string()
    } else {
      let path = &req.request_path;
      match (path.rfind('/'), path.rfind('.')) {
        (Some(slash), Some(dot)) if dot > slash => path[dot + 1..].to_string(),
        _ => String::new(),
      }
    };

    rep.reply_partial = content_size > rep.max_content_size;
    rep.status = Status::Ok;
    self.read_from_file(connection_id, req, rep);
    if !rep.reply_partial {
      // all data fits in the initial content
      file_io.borrow_mut().close_read_file(&id);
    }

    rep.headers.insert(
      0,
      Header {
        name: "Content-Length".to_string(),
        value: content_size.to_string(),
      },
    );
    rep.headers.insert(
      1,
      Header {
        name: "Content-Type".to_string(),
        value: mime::extension_to_type(&extension).to_string(),
      },
    );
    rep.return_to_client = true;
    true
  }

  fn read_from_file(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    rep: &mut Reply,
  ) -> usize {
    let Some(file_io) = &self.file_io else {
      return 0;
    };
    rep.content.resize(rep.max_content_size, 0);
    let bytes_read = file_io.borrow_mut().read_file(
      &connection_id.to_string(),
      req,
      &mut rep.content,
    );
    rep.content.truncate(bytes_read);
    bytes_read
  }

  fn write_file_parts(
    &self,
    connection_id: ConnectionId,
    req: &Request,
    rep: &mut Reply,
    parts: &VecDeque<ContentPart>,
    data: &[u8],
  ) {
    let Some(file_io) = &self.file_io else {
      return;
    };

    // Clients typically deliver the part headers at the end of one read
    // and the part data in the next. The parser reports parts one buffer
    // late, so peek at the pending parts and open their files now; the
    // open result reaches the client before it sends the data.
    let peeked: Vec<ContentPart> = rep
      .multipart_parser
      .peek_last_parts()
      .iter()
      .filter(|part| part.header_only && !part.filename.is_empty())
      .cloned()
      .collect();
    for part in &peeked {
      let write_id =
        format!("{}{}{}", req.request_path, part.filename, connection_id);
      file_io.borrow_mut().open_file_for_write(&write_id, req, rep);
      rep.multipart_counter += 1;
      if !rep.status.is_success() {
        return;
      }
    }

    // the actual data writes, in part order
    for part in parts {
      if part.header_only {
        if !part.filename.is_empty() {
          // already opened through the peek above
          rep.last_open_write_id =
            format!("{}{}{}", req.request_path, part.filename, connection_id);
        }
        continue;
      }

      if !part.filename.is_empty() {
        // part headers and data arrived in the same read; open late
        let write_id =
          format!("{}{}{}", req.request_path, part.filename, connection_id);
        rep.last_open_write_id = write_id.clone();
        file_io.borrow_mut().open_file_for_write(&write_id, req, rep);
        rep.multipart_counter += 1;
        if !rep.status.is_success() {
          rep.last_open_write_id.clear();
          return;
        }
      }

      if rep.last_open_write_id.is_empty() {
        continue;
      }
      let write_id = rep.last_open_write_id.clone();
      let slice = data.get(part.start..part.end).unwrap_or(&[]);
      file_io
        .borrow_mut()
        .write_file(&write_id, req, rep, slice, part.found_end);
      if !rep.status.is_success() {
        file_io.borrow_mut().close_write_file(&write_id);
        rep.last_open_write_id.clear();
        return;
      }
      if part.found_end {
        rep.last_open_write_id.clear();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[derive(Default)]
  struct MockFileIO {
    files: HashMap<String, Vec<u8>>,
    read_offsets: HashMap<String, (String, usize)>,
    written: HashMap<String, Vec<u8>>,
    last_data_seen: HashMap<String, bool>,
    open_read_calls: usize,
    close_read_calls: usize,
    open_write_calls: usize,
    fail_open_write: bool,
  }

  impl MockFileIO {
    fn with_file(path: &str, size: usize) -> Self {
      let mut mock = Self::default();
      mock
        .files
        .insert(path.to_string(), (0..size).map(|b| b as u8).collect());
      mock
    }
  }

  impl FileIO for MockFileIO {
    fn open_file_for_read(
      &mut self,
      id: &str,
      _request: &Request,
      reply: &mut Reply,
    ) -> usize {
      self.open_read_calls += 1;
      match self.files.get(&reply.file_path) {
        Some(data) => {
          self
            .read_offsets
            .insert(id.to_string(), (reply.file_path.clone(), 0));
          data.len()
        }
        None => 0,
      }
    }

    fn read_file(&mut self, id: &str, _request: &Request, buf: &mut [u8]) -> usize {
      let Some((path, offset)) = self.read_offsets.get_mut(id) else {
        return 0;
      };
      let data = &self.files[path.as_str()];
      let n = buf.len().min(data.len() - *offset);
      buf[..n].copy_from_slice(&data[*offset..*offset + n]);
      *offset += n;
      n
    }

    fn close_read_file(&mut self, id: &str) {
      if self.read_offsets.remove(id).is_some() {
        self.close_read_calls += 1;
      }
    }

    fn open_file_for_write(&mut self, id: &str, _request: &Request, reply: &mut Reply) {
      if self.fail_open_write {
        reply.content.clear();
        reply.content.extend_from_slice(b"cannot open file");
        reply.send_content(Status::InternalServerError, "text/plain");
        return;
      }
      self.open_write_calls += 1;
      self.written.insert(id.to_string(), Vec::new());
      reply.send(Status::Created);
    }

    fn write_file(
      &mut self,
      id: &str,
      _request: &Request,
      reply: &mut Reply,
      data: &[u8],
      last_data: bool,
    ) {
      self.written.entry(id.to_string()).or_default().extend_from_slice(data);
      self.last_data_seen.insert(id.to_string(), last_data);
      if last_data {
        reply.send(Status::Ok);
      }
    }
  }

  struct Fixture {
    handler: RequestHandler,
    file_io: Rc<RefCell<MockFileIO>>,
    reply: Reply,
  }

  impl Fixture {
    fn new(mock: MockFileIO) -> Self {
      let file_io = Rc::new(RefCell::new(mock));
      let mut handler = RequestHandler::new();
      handler.set_file_io(file_io.clone());
      Self {
        handler,
        file_io,
        reply: Reply::new(1024),
      }
    }
  }

  fn get_request(path: &str) -> Request {
    let mut req = Request::new();
    req.method = "GET".to_string();
    req.uri = path.to_string();
    assert!(req.decode(&[]));
    req
  }

  fn multipart_post(boundary: &str, content_length: usize) -> Request {
    let mut req = Request::new();
    req.method = "POST".to_string();
    req.uri = "/".to_string();
    req.headers.push(Header {
      name: "Content-Type".to_string(),
      value: format!("multipart/form-data; boundary={}", boundary),
    });
    req.content_length = content_length;
    assert!(req.decode(&[]));
    req
  }

  #[test]
  fn serves_small_file_with_headers() {
    let mut f = Fixture::new(MockFileIO::with_file("/index.html", 100));
    let req = get_request("/index.html");
    let mut content = Vec::new();

    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert!(f.reply.return_to_client);
    assert_eq!(f.reply.status(), Status::Ok);
    assert_eq!(f.reply.headers[0].name, "Content-Length");
    assert_eq!(f.reply.headers[0].value, "100");
    assert_eq!(f.reply.headers[1].name, "Content-Type");
    assert_eq!(f.reply.headers[1].value, "text/html");
    assert_eq!(f.reply.content.len(), 100);
    assert!(!f.reply.reply_partial);
    // file fully served, sink released
    assert_eq!(f.file_io.borrow().close_read_calls, 1);
  }

  #[test]
  fn appends_index_html_for_directories() {
    let mut f = Fixture::new(MockFileIO::with_file("/index.html", 100));
    let req = get_request("/");
    let mut content = Vec::new();

    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.file_path, "/index.html");
    assert_eq!(f.reply.status(), Status::Ok);
    assert_eq!(f.reply.headers[1].value, "text/html");
  }

  #[test]
  fn missing_file_yields_stock_not_found() {
    let mut f = Fixture::new(MockFileIO::default());
    let req = get_request("/missing.txt");
    let mut content = Vec::new();

    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.status(), Status::NotFound);
    assert_eq!(f.file_io.borrow().open_read_calls, 1);
    assert_eq!(f.file_io.borrow().close_read_calls, 0);
  }

  #[test]
  fn custom_not_found_handler_wins() {
    let mut f = Fixture::new(MockFileIO::default());
    f.handler.set_not_found_handler(Box::new(|_req, rep| {
      rep.content.extend_from_slice(b"This is mocked content");
      rep.send_content(Status::Ok, "text/plain");
    }));
    let req = get_request("/missing.txt");
    let mut content = Vec::new();

    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.status(), Status::Ok);
    assert_eq!(f.reply.content, b"This is mocked content");
    assert_eq!(f.reply.header_value("Content-Length"), "22");
  }

  #[test]
  fn handlers_run_in_order_until_finalised() {
    let mut f = Fixture::new(MockFileIO::default());
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    f.handler.add_request_handler(Box::new(move |_req, _rep| {
      o.borrow_mut().push(1);
    }));
    let o = order.clone();
    f.handler.add_request_handler(Box::new(move |_req, rep| {
      o.borrow_mut().push(2);
      rep.send(Status::Accepted);
    }));
    let o = order.clone();
    f.handler.add_request_handler(Box::new(move |_req, _rep| {
      o.borrow_mut().push(3);
    }));

    let req = get_request("/api/status");
    let mut content = Vec::new();
    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(*order.borrow(), vec![1, 2]);
    assert_eq!(f.reply.status(), Status::Accepted);
  }

  #[test]
  fn large_file_is_served_in_parts() {
    let mut f = Fixture::new(MockFileIO::with_file("/big.bin", 2500));
    let req = get_request("/big.bin");
    let mut content = Vec::new();

    f.handler.handle_request(0, &req, &mut content, &mut f.reply);
    assert!(f.reply.reply_partial);
    assert_eq!(f.reply.header_value("Content-Length"), "2500");
    assert_eq!(f.reply.content.len(), 1024);

    let mut served = f.reply.content.clone();
    while f.reply.reply_partial && !f.reply.final_part {
      f.handler.handle_partial_read(0, &req, &mut f.reply);
      served.extend_from_slice(&f.reply.content);
    }

    assert_eq!(served.len(), 2500);
    assert_eq!(served, f.file_io.borrow().files["/big.bin"]);
    assert_eq!(f.file_io.borrow().close_read_calls, 1);
  }

  #[test]
  fn complete_multipart_upload_in_one_buffer() {
    let boundary = "--------------------------338874100326900647006157";
    let body = format!(
      "--{b}\r\n\
       Content-Disposition: form-data; name=\"file1\"; filename=\"firstpart.txt\"\r\n\
       Content-Type: text/plain\r\n\r\n\
       First part\n\r\n--{b}--\r\n",
      b = boundary
    );
    let req = multipart_post(boundary, body.len());
    let mut f = Fixture::new(MockFileIO::default());
    let mut content = body.into_bytes();

    f.handler.handle_request(7, &req, &mut content, &mut f.reply);

    assert!(f.reply.is_multipart);
    assert_eq!(f.reply.status(), Status::Ok);
    let mock = f.file_io.borrow();
    assert_eq!(mock.open_write_calls, 1);
    assert_eq!(mock.written["/firstpart.txt7"], b"First part\n");
    assert!(mock.last_data_seen["/firstpart.txt7"]);
  }

  #[test]
  fn split_multipart_opens_file_from_header_part() {
    let boundary = "--------------------------338874100326900647006157";
    let chunk1 = format!(
      "--{b}\r\n\
       Content-Disposition: form-data; name=\"file1\"; filename=\"firstpart.txt\"\r\n\
       Content-Type: text/plain\r\n\r\n",
      b = boundary
    );
    let chunk2 = format!("First part.\n\r\n--{b}--\r\n", b = boundary);
    let req = multipart_post(boundary, chunk1.len() + chunk2.len());
    let mut f = Fixture::new(MockFileIO::default());

    let mut content = chunk1.into_bytes();
    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    // the header-only part opens the file and acknowledges with 201
    assert_eq!(f.reply.status(), Status::Created);
    assert_eq!(f.reply.multipart_counter, 1);
    assert_eq!(f.file_io.borrow().open_write_calls, 1);

    // the connection sends the interim ack and clears the reply surface
    f.reply.headers.clear();
    f.reply.return_to_client = false;
    f.reply.status = Status::Ok;

    let mut content = chunk2.into_bytes();
    f.handler.handle_partial_write(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.status(), Status::Ok);
    let mock = f.file_io.borrow();
    assert_eq!(mock.open_write_calls, 1);
    assert_eq!(mock.written["/firstpart.txt0"], b"First part.\n");
    assert!(mock.last_data_seen["/firstpart.txt0"]);
  }

  #[test]
  fn multiple_parts_open_multiple_files() {
    let boundary = "--------------------------383973011316738131928582";
    let chunk1 = format!(
      "--{b}\r\n\
       Content-Disposition: form-data; name=\"file1\"; filename=\"firstpart.txt\"\r\n\
       Content-Type: text/plain\r\n\r\n",
      b = boundary
    );
    let chunk2 = format!(
      "First part.\n\r\n\
       --{b}\r\n\
       Content-Disposition: form-data; name=\"file2\"; filename=\"secondpart.txt\"\r\n\
       Content-Type: text/plain\r\n\r\n",
      b = boundary
    );
    let chunk3 = format!("Second part,\n\r\n--{b}--\r\n", b = boundary);
    let req = multipart_post(boundary, chunk1.len() + chunk2.len() + chunk3.len());
    let mut f = Fixture::new(MockFileIO::default());

    let mut content = chunk1.into_bytes();
    f.handler.handle_request(0, &req, &mut content, &mut f.reply);
    f.reply.headers.clear();
    f.reply.return_to_client = false;
    f.reply.status = Status::Ok;

    let mut content = chunk2.into_bytes();
    f.handler.handle_partial_write(0, &req, &mut content, &mut f.reply);
    f.reply.headers.clear();
    f.reply.return_to_client = false;
    f.reply.status = Status::Ok;

    let mut content = chunk3.into_bytes();
    f.handler.handle_partial_write(0, &req, &mut content, &mut f.reply);

    let mock = f.file_io.borrow();
    assert_eq!(mock.open_write_calls, 2);
    assert_eq!(mock.written["/firstpart.txt0"], b"First part.\n");
    assert_eq!(mock.written["/secondpart.txt0"], b"Second part,\n");
    assert!(mock.last_data_seen["/firstpart.txt0"]);
    assert!(mock.last_data_seen["/secondpart.txt0"]);
  }

  #[test]
  fn sink_open_failure_halts_upload() {
    let boundary = "--------------------------338874100326900647006157";
    let chunk1 = format!(
      "--{b}\r\n\
       Content-Disposition: form-data; name=\"file1\"; filename=\"firstpart.txt\"\r\n\
       Content-Type: text/plain\r\n\r\n",
      b = boundary
    );
    let req = multipart_post(boundary, 222);
    let mut mock = MockFileIO::default();
    mock.fail_open_write = true;
    let mut f = Fixture::new(mock);

    let mut content = chunk1.into_bytes();
    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.status(), Status::InternalServerError);
    assert_eq!(f.file_io.borrow().open_write_calls, 0);
  }

  #[test]
  fn bad_multipart_content_is_rejected() {
    let boundary = "--------------------------338874100326900647006157";
    let req = multipart_post(boundary, 64);
    let mut f = Fixture::new(MockFileIO::default());

    let mut content = b"not a multipart body at all".to_vec();
    f.handler.handle_request(0, &req, &mut content, &mut f.reply);

    assert_eq!(f.reply.status(), Status::BadRequest);
  }
}
