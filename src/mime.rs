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

/// Map a file extension to a MIME content type. Unknown extensions map to
/// `text/plain`. The lookup is case-insensitive.
pub fn extension_to_type(extension: &str) -> &'static str {
  match extension.to_ascii_lowercase().as_str() {
    "css" => "text/css",
    "gif" => "image/gif",
    "htm" | "html" => "text/html",
    "jpg" | "jpeg" => "image/jpeg",
    "js" => "application/javascript",
    "json" => "application/json",
    "png" => "image/png",
    "bmp" => "image/bmp",
    "webp" => "image/webp",
    "ico" => "image/x-icon",
    "svg" => "image/svg+xml",
    "txt" => "text/plain",
    "csv" => "text/csv",
    "md" => "text/markdown",
    "xml" => "application/xml",
    "pdf" => "application/pdf",
    "zip" => "application/zip",
    "gz" => "application/gzip",
    "tar" => "application/x-tar",
    "rtf" => "application/rtf",
    "mp3" => "audio/mpeg",
    "m4a" => "audio/mp4",
    "mp4" => "video/mp4",
    "mpeg" => "video/mpeg",
    "avi" => "video/x-msvideo",
    "mov" => "video/quicktime",
    "webm" => "video/webm",
    "ogg" => "application/ogg",
    "ogv" => "video/ogg",
    "wav" => "audio/wav",
    "flac" => "audio/flac",
    "woff" => "font/woff",
    "woff2" => "font/woff2",
    "ttf" => "font/ttf",
    "eot" => "application/vnd.ms-fontobject",
    "wasm" => "application/wasm",
    "sh" => "application/x-sh",
    "c" | "cpp" | "h" | "hpp" => "text/x-c",
    "py" => "text/x-python",
    "ts" => "application/typescript",
    "jsx" => "text/jsx",
    "tsx" => "text/tsx",
    "yaml" | "yml" => "text/yaml",
    "apk" => "application/vnd.android.package-archive",
    "3gp" => "video/3gpp",
    _ => "text/plain",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_extensions() {
    assert_eq!(extension_to_type("html"), "text/html");
    assert_eq!(extension_to_type("json"), "application/json");
    assert_eq!(extension_to_type("woff2"), "font/woff2");
  }

  #[test]
  fn lookup_is_case_insensitive() {
    assert_eq!(extension_to_type("HTML"), "text/html");
    assert_eq!(extension_to_type("Jpg"), "image/jpeg");
  }

  #[test]
  fn unknown_extension_is_text_plain() {
    assert_eq!(extension_to_type("bin"), "text/plain");
    assert_eq!(extension_to_type(""), "text/plain");
  }
}
