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

use crate::reply::Reply;
use crate::request::Request;

/// File storage sink, to be implemented by each specific project.
///
/// Read operations are keyed by the connection id rendered as a string;
/// write operations by `request_path + filename + connection_id`. The sink
/// reports failures by finalising `reply` itself (e.g. a 404 or 500 with a
/// JSON body), which the server then sends verbatim.
pub trait FileIO {
  /// Open `reply.file_path` for reading and return its total size in
  /// bytes. Return 0 when the file cannot be served; a reply finalised
  /// here (404, 304, ...) is sent as-is, otherwise the not-found flow
  /// runs.
  fn open_file_for_read(&mut self, id: &str, request: &Request, reply: &mut Reply) -> usize;

  /// Read the next chunk of an open file into `buf`, returning the number
  /// of bytes read. A short or zero read marks the end of the file.
  fn read_file(&mut self, id: &str, request: &Request, buf: &mut [u8]) -> usize;

  /// Close a file previously opened for reading.
  fn close_read_file(&mut self, id: &str);

  /// Open a file for writing an uploaded multipart part. Errors are
  /// reported through `reply`; a 201 finalised here acknowledges the
  /// opened file to the client.
  fn open_file_for_write(&mut self, id: &str, request: &Request, reply: &mut Reply);

  /// Append part data to an open write file. `last_data` is true for the
  /// final chunk of the part, after which the file is closed.
  fn write_file(
    &mut self,
    id: &str,
    request: &Request,
    reply: &mut Reply,
    data: &[u8],
    last_data: bool,
  );

  /// Release a write file without a final chunk, on upload abort or
  /// connection loss.
  fn close_write_file(&mut self, _id: &str) {}
}
