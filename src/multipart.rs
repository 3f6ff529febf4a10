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

use std::collections::VecDeque;

use crate::request::{Header, Request};

/// A slice of one multipart body part, expressed as a byte range into the
/// buffer handed back by [`MultipartParser::parse`] or
/// [`MultipartParser::flush`].
#[derive(Debug, Clone, Default)]
pub struct ContentPart {
  /// Filename from the part's Content-Disposition header; empty for parts
  /// that continue a file started in an earlier buffer.
  pub filename: String,
  pub start: usize,
  pub end: usize,
  /// The buffer ended between the part headers and its data.
  pub header_only: bool,
  /// `start` marks the actual beginning of the part data. When false the
  /// data continues from the previous buffer and `start` is the buffer
  /// start.
  pub found_start: bool,
  /// `end` marks the actual end of the part data. When false the data
  /// continues into the next buffer and `end` is the buffer end.
  pub found_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartResult {
  /// The terminal `--` of the closing boundary was seen. Call
  /// [`MultipartParser::flush`] to retrieve the final lookback part.
  Done,
  Bad,
  /// More data is required.
  Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  ExpectingHyphen1,
  ExpectingHyphen2,
  BoundaryFirst,
  ExpectingNewline1,
  HeaderLineStart,
  HeaderLws,
  HeaderName,
  SpaceBeforeHeaderValue,
  HeaderValue,
  ExpectingNewline2,
  ExpectingNewline3,
  PartDataStart,
  PartDataCont,
  ExpectingHyphen3,
  BoundaryNext,
  BoundaryClose,
  BoundaryEndNewline,
  ClosingHyphen,
  ClosingCr,
}

/// Streaming parser for `multipart/form-data` bodies.
///
/// Part boundaries may straddle buffer refills, so the parser keeps one
/// buffer of look-back: each call to `parse` swaps the caller's buffer with
/// the previous one and reports the *previous* buffer's parts, with end
/// offsets adjusted back by `boundary.len() + 6` to exclude the
/// `\r\n--boundary\r\n` delimiter. An end marker found early in a new buffer
/// for data that started in the previous buffer is transferred onto the
/// still-pending part and the spurious part is discarded.
pub struct MultipartParser {
  state: State,
  headers: Vec<Header>,
  last_buffer: Vec<u8>,
  last_parts: VecDeque<ContentPart>,
  boundary: String,
  boundary_count: usize,
}

impl Default for MultipartParser {
  fn default() -> Self {
    Self::new()
  }
}

impl MultipartParser {
  pub fn new() -> Self {
    Self {
      state: State::ExpectingHyphen1,
      headers: Vec::new(),
      last_buffer: Vec::new(),
      last_parts: VecDeque::new(),
      boundary: String::new(),
      boundary_count: 0,
    }
  }

  /// Reset to the initial parser state.
  pub fn reset(&mut self) {
    self.state = State::ExpectingHyphen1;
    self.headers.clear();
    self.last_buffer.clear();
    self.last_parts.clear();
    self.boundary.clear();
    self.boundary_count = 0;
  }

  /// Extract the boundary token from the request's Content-Type header.
  /// Returns true when the request is a multipart upload.
  pub fn parse_header(&mut self, req: &Request) -> bool {
    self.reset();
    let content_type = req.header_value("Content-Type");
    if !content_type.contains("multipart") {
      return false;
    }
    const KEY: &str = "boundary=";
    match content_type.find(KEY) {
      Some(start) => {
        let value = &content_type[start + KEY.len()..];
        // token runs to the next ';' or the end of the header value
        self.boundary = match value.find(';') {
          Some(end) => value[..end].to_string(),
          None => value.to_string(),
        };
        !self.boundary.is_empty()
      }
      None => false,
    }
  }

  /// Parse multipart content. `Done` is returned when all parts have been
  /// seen, `Indeterminate` when more data is required. The caller must
  /// inspect `parts` for completed slices of the returned buffer: on return
  /// `content` holds the *previous* buffer and `parts` its parts.
  pub fn parse(
    &mut self,
    content: &mut Vec<u8>,
    parts: &mut VecDeque<ContentPart>,
  ) -> MultipartResult {
    if content.is_empty() {
      return MultipartResult::Indeterminate;
    }

    parts.clear();
    let mut result = MultipartResult::Indeterminate;
    for i in 0..content.len() {
      result = self.consume(content[i], i, parts);
      if result != MultipartResult::Indeterminate {
        break;
      }
    }

    if result == MultipartResult::Bad {
      return result;
    }

    // if no filename/start/end was found, consume() did not create a part;
    // we must be in the middle of content somewhere, which is a part
    if result == MultipartResult::Indeterminate {
      if parts.is_empty() {
        parts.push_back(ContentPart::default());
      }
      // a buffer that ends inside a boundary line or the part headers
      // carries no data for the pending part
      let in_headers = !matches!(
        self.state,
        State::PartDataCont
          | State::ExpectingHyphen3
          | State::BoundaryNext
          | State::BoundaryClose
          | State::BoundaryEndNewline
          | State::ClosingHyphen
          | State::ClosingCr
      );
      if in_headers {
        if let Some(part) = parts.back_mut() {
          if !part.found_start {
            part.header_only = true;
          }
        }
      }
    }

    // hand back the previous buffer's parts, keep the new ones
    std::mem::swap(parts, &mut self.last_parts);
    std::mem::swap(content, &mut self.last_buffer);

    // fix up the stored parts so they are correct when swapped out on the
    // next call
    let adjust = self.boundary.len() + 6;
    let mut spurious_first = false;
    for part in self.last_parts.iter_mut() {
      if !part.found_start {
        part.start = 0;
      }
      if !part.found_end {
        part.end = self.last_buffer.len();
        continue;
      }
      let adjusted = part.end as isize - adjust as isize;
      if adjusted < part.start as isize {
        // the end marker belongs to a part that started in the previous
        // buffer: move it onto the part we are about to hand out
        if let Some(previous) = parts.back_mut() {
          let deficit = part.start as isize - adjusted;
          previous.end = (previous.end as isize - deficit) as usize;
          previous.found_end = true;
          spurious_first = true;
        }
      } else {
        part.end = adjusted as usize;
      }
    }
    if spurious_first {
      self.last_parts.pop_front();
    }

    result
  }

  /// Retrieve the final lookback buffer and parts after `parse` returned
  /// `Done`.
  pub fn flush(
    &mut self,
    content: &mut Vec<u8>,
    parts: &mut VecDeque<ContentPart>,
  ) {
    std::mem::swap(parts, &mut self.last_parts);
    std::mem::swap(content, &mut self.last_buffer);
    self.last_parts.clear();
    self.last_buffer.clear();
  }

  /// The parts pending in the lookback buffer; they will be handed out on
  /// the next `parse` or `flush` call.
  pub fn peek_last_parts(&self) -> &VecDeque<ContentPart> {
    &self.last_parts
  }

  fn consume(
    &mut self,
    input: u8,
    i: usize,
    parts: &mut VecDeque<ContentPart>,
  ) -> MultipartResult {
    use MultipartResult::*;

    match self.state {
      State::ExpectingHyphen1 => {
        if input != b'-' {
          return Bad;
        }
        self.state = State::ExpectingHyphen2;
        Indeterminate
      }
      State::ExpectingHyphen2 => {
        if input != b'-' {
          return Bad;
        }
        self.state = State::BoundaryFirst;
        Indeterminate
      }
      State::BoundaryFirst => {
        if input == b'\r' {
          self.state = State::ExpectingNewline1;
        }
        Indeterminate
      }
      State::ExpectingNewline1 => {
        if input != b'\n' {
          return Bad;
        }
        self.state = State::HeaderLineStart;
        Indeterminate
      }
      State::HeaderLineStart => {
        if input == b'\r' {
          self.state = State::ExpectingNewline3;
        } else if !self.headers.is_empty() && (input == b' ' || input == b'\t') {
          self.state = State::HeaderLws;
        } else if !is_header_char(input) {
          return Bad;
        } else {
          let mut header = Header::default();
          header.name.reserve(20);
          header.value.reserve(50);
          header.name.push(input as char);
          self.headers.push(header);
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
          if let Some(h) = self.headers.last_mut() {
            h.value.push(input as char);
          }
        }
        Indeterminate
      }
      State::HeaderName => {
        if input == b':' {
          self.state = State::SpaceBeforeHeaderValue;
        } else if !is_header_char(input) {
          return Bad;
        } else if let Some(h) = self.headers.last_mut() {
          h.name.push(input as char);
        }
        Indeterminate
      }
      State::SpaceBeforeHeaderValue => {
        if input != b' ' {
          return Bad;
        }
        self.state = State::HeaderValue;
        Indeterminate
      }
      State::HeaderValue => {
        if input == b'\r' {
          let header = self.headers.last().cloned().unwrap_or_default();
          if header.name.eq_ignore_ascii_case("Content-Disposition") {
            const KEY: &str = "filename=\"";
            let filename = header.value.rfind(KEY).and_then(|start| {
              let rest = &header.value[start + KEY.len()..];
              rest.find('"').map(|end| rest[..end].to_string())
            });
            match filename {
              Some(filename) => {
                if parts.is_empty() {
                  parts.push_back(ContentPart::default());
                }
                if let Some(part) = parts.back_mut() {
                  part.filename = filename;
                }
                self.headers.clear();
              }
              None => return Bad,
            }
          }
          self.state = State::ExpectingNewline2;
        } else if is_ctl(input) {
          return Bad;
        } else if let Some(h) = self.headers.last_mut() {
          h.value.push(input as char);
        }
        Indeterminate
      }
      State::ExpectingNewline2 => {
        if input != b'\n' {
          return Bad;
        }
        self.state = State::HeaderLineStart;
        Indeterminate
      }
      State::ExpectingNewline3 => {
        if input != b'\n' {
          return Bad;
        }
        if parts.is_empty() {
          parts.push_back(ContentPart::default());
        }
        if let Some(part) = parts.back_mut() {
          part.header_only = true;
        }
        self.state = State::PartDataStart;
        Indeterminate
      }
      State::PartDataStart => {
        if parts.is_empty() {
          parts.push_back(ContentPart::default());
        }
        if let Some(part) = parts.back_mut() {
          part.header_only = false;
          part.start = i;
          part.found_start = true;
        }
        self.state = State::PartDataCont;
        Indeterminate
      }
      State::PartDataCont => {
        if input == b'-' {
          self.state = State::ExpectingHyphen3;
        }
        Indeterminate
      }
      State::ExpectingHyphen3 => {
        if input == b'-' {
          self.state = State::BoundaryNext;
          self.boundary_count = 0;
        } else {
          self.state = State::PartDataCont;
        }
        Indeterminate
      }
      State::BoundaryNext => {
        if input == self.boundary.as_bytes()[self.boundary_count] {
          self.boundary_count += 1;
          if self.boundary_count == self.boundary.len() {
            self.state = State::BoundaryClose;
          }
        } else {
          self.boundary_count = 0;
          self.state = State::PartDataCont;
        }
        Indeterminate
      }
      State::BoundaryClose => {
        // first byte after the boundary token
        match input {
          b'-' => self.state = State::ClosingHyphen,
          b'\r' => self.state = State::BoundaryEndNewline,
          _ => return Bad,
        }
        Indeterminate
      }
      State::BoundaryEndNewline => {
        if input != b'\n' {
          return Bad;
        }
        if parts.is_empty() {
          parts.push_back(ContentPart::default());
        }
        if let Some(part) = parts.back_mut() {
          part.end = i + 1;
          part.found_end = true;
        }
        parts.push_back(ContentPart::default());
        self.state = State::HeaderLineStart;
        Indeterminate
      }
      State::ClosingHyphen => {
        if input != b'-' {
          return Bad;
        }
        self.state = State::ClosingCr;
        Indeterminate
      }
      State::ClosingCr => {
        if input != b'\r' {
          return Bad;
        }
        if parts.is_empty() {
          parts.push_back(ContentPart::default());
        }
        if let Some(part) = parts.back_mut() {
          part.end = i;
          part.found_end = true;
        }
        Done
      }
    }
  }
}

fn is_ctl(c: u8) -> bool {
  c <= 31 || c == 127
}

fn is_header_char(c: u8) -> bool {
  if c >= 128 || is_ctl(c) {
    return false;
  }
  !matches!(
    c,
    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
      | b'[' | b']' | b'?' | b'=' | b'{' | b'}' | b' ' | b'\t'
  )
}
