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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("Unexpected EOF")]
  UnexpectedEOF,
  #[error("Connection is closed")]
  ConnectionClosed,
  #[error("Frame too large")]
  FrameTooLarge,
  #[error("Invalid frame opcode: {0}")]
  InvalidOpCode(u8),
  #[error("Fragmented frames are not supported")]
  FragmentedFrame,
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),
}
