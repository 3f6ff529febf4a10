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

use rand::Rng;

/// Source of 32-bit random values for WebSocket mask keys.
///
/// Platform-specific implementations can be injected:
/// - Embedded: hardware accelerated random, where available
/// - General servers: system random devices
/// - Tests: a fixed sequence for deterministic frames
pub trait RandomSource {
  fn next_u32(&mut self) -> u32;
}

/// Default implementation backed by the thread-local generator of `rand`.
#[derive(Default)]
pub struct DefaultRandom;

impl RandomSource for DefaultRandom {
  fn next_u32(&mut self) -> u32 {
    rand::thread_rng().gen()
  }
}

/// xorshift32 PRNG. Much faster than the system generator and suitable for
/// embedded targets, but not cryptographically secure.
pub struct FastRandom {
  state: u32,
}

impl FastRandom {
  pub fn new(seed: u32) -> Self {
    Self {
      // xorshift cannot escape a zero state
      state: if seed == 0 { 0x12345678 } else { seed },
    }
  }
}

impl Default for FastRandom {
  fn default() -> Self {
    Self::new(0x12345678)
  }
}

impl RandomSource for FastRandom {
  fn next_u32(&mut self) -> u32 {
    self.state ^= self.state << 13;
    self.state ^= self.state >> 17;
    self.state ^= self.state << 5;
    self.state
  }
}
