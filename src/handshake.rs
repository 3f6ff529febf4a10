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

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key, per
/// RFC 6455 §4.2.2: base64(sha1(key + GUID)).
pub fn sec_websocket_accept(key: &str) -> String {
  let mut sha1 = Sha1::new();
  sha1.update(key.trim().as_bytes());
  sha1.update(WS_GUID.as_bytes());
  STANDARD.encode(sha1.finalize())
}
