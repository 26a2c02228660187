/*
 * parser.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of tcphttp, an HTTP/1.1 client over raw TCP and TLS sockets.
 *
 * tcphttp is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tcphttp is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tcphttp.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP/1.1 response push parser: header block, then chunked or Content-Length body.
//!
//! Bytes are fed as they arrive from the socket, in any fragmentation. Consumed bytes
//! are removed from the accumulation buffer, so repeated calls never re-read input.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{HttpError, Result};

/// Longest chunk-size or trailer line accepted before declaring the framing broken.
const MAX_LINE_LEN: usize = 8 * 1024;
/// Largest header block accepted.
const MAX_HEADER_BLOCK: usize = 64 * 1024;
/// Largest decoded body accepted, whether declared by Content-Length or built from chunks.
const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

/// Callbacks for response events. The connection implements this to build a `Response`
/// and route `Set-Cookie` headers to the jar.
pub trait H1ResponseHandler {
    fn status(&mut self, version: &str, code: u16, phrase: &str);
    fn header(&mut self, name: &str, value: &str);
    /// Trailer fields after a chunked body.
    fn trailer(&mut self, _name: &str, _value: &str) {}
    /// Called exactly once per response with the decoded body.
    fn complete(&mut self, body: Bytes);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Headers,
    FixedBody,
    ChunkSize,
    ChunkData,
    ChunkTrailer,
    Complete,
}

/// Result of feeding one socket read to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NeedMore,
    Complete,
}

/// Push parser for one HTTP/1.1 response.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    /// Unconsumed input.
    buf: BytesMut,
    /// Decoded body.
    body: BytesMut,
    /// Where the next search for the header delimiter starts.
    scan_from: usize,
    content_length: Option<u64>,
    chunked: bool,
    chunk_size: usize,
    /// False for responses to HEAD.
    body_allowed: bool,
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    find(buf, b"\r\n", 0)
}

fn parse_error(msg: impl Into<String>) -> HttpError {
    HttpError::Parse(msg.into())
}

/// Declared body length as a buffer size, within `MAX_BODY_LEN`.
fn body_len(declared: u64) -> Result<usize> {
    usize::try_from(declared)
        .ok()
        .filter(|&len| len <= MAX_BODY_LEN)
        .ok_or_else(|| parse_error(format!("Content-Length {} exceeds body limit", declared)))
}

/// Parse a chunk-size line (without CRLF): hex digits, optionally followed by `;ext`.
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line).map_err(|_| parse_error("invalid chunk size UTF-8"))?;
    let size = text.split(';').next().unwrap_or("").trim_matches(|c| c == ' ' || c == '\t');
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(parse_error(format!("invalid chunk size {:?}", text)));
    }
    usize::from_str_radix(size, 16)
        .map_err(|_| parse_error(format!("chunk size out of range {:?}", text)))
}

/// Split a status line into version, code, and phrase. The phrase may contain spaces or
/// be absent.
fn parse_status_line(line: &str) -> Result<(&str, u16, &str)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");
    let phrase = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(parse_error(format!("malformed status line {:?}", line)));
    }
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(parse_error(format!("malformed status code in {:?}", line)));
    }
    let code = code
        .parse::<u16>()
        .map_err(|_| parse_error(format!("malformed status code in {:?}", line)))?;
    Ok((version, code, phrase))
}

/// Split a header line once on `:`. Optional whitespace around the value is dropped.
fn parse_header_line(line: &str) -> Result<(&str, &str)> {
    let colon = line
        .find(':')
        .ok_or_else(|| parse_error(format!("malformed header line {:?}", line)))?;
    let name = &line[..colon];
    if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
        return Err(parse_error(format!("malformed header name in {:?}", line)));
    }
    Ok((name, line[colon + 1..].trim()))
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Headers,
            buf: BytesMut::with_capacity(8192),
            body: BytesMut::new(),
            scan_from: 0,
            content_length: None,
            chunked: false,
            chunk_size: 0,
            body_allowed: true,
        }
    }

    /// Parser for the response to a HEAD request: headers only, whatever the framing says.
    pub fn without_body() -> Self {
        Self {
            body_allowed: false,
            ..Self::new()
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Declared Content-Length, once headers are parsed.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Append `data` and parse as far as possible. Returns `Complete` exactly when the
    /// response finished during this call or an earlier one; `handler.complete` runs once.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Progress> {
        if self.state == ParseState::Complete {
            if !data.is_empty() {
                warn!(len = data.len(), "discarding bytes received after response end");
            }
            return Ok(Progress::Complete);
        }
        self.buf.extend_from_slice(data);
        loop {
            match self.state {
                ParseState::Headers => {
                    let start = self.scan_from.saturating_sub(3);
                    let Some(end) = find(&self.buf, b"\r\n\r\n", start) else {
                        if self.buf.len() > MAX_HEADER_BLOCK {
                            return Err(parse_error("header block too large"));
                        }
                        self.scan_from = self.buf.len();
                        return Ok(Progress::NeedMore);
                    };
                    let block = self.buf.split_to(end + 4);
                    self.scan_from = 0;
                    self.parse_head(&block[..end], handler)?;
                }
                ParseState::FixedBody => {
                    let len = body_len(self.content_length.unwrap_or(0))?;
                    if self.buf.len() < len {
                        return Ok(Progress::NeedMore);
                    }
                    self.body = self.buf.split_to(len);
                    if !self.buf.is_empty() {
                        warn!(
                            surplus = self.buf.len(),
                            "discarding bytes beyond Content-Length"
                        );
                        self.buf.clear();
                    }
                    self.finish(handler);
                }
                ParseState::ChunkSize => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_LINE_LEN {
                            return Err(parse_error("chunk size line too long"));
                        }
                        return Ok(Progress::NeedMore);
                    };
                    let line = self.buf.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    trace!(size, "chunk");
                    if size > MAX_BODY_LEN - self.body.len() {
                        return Err(parse_error(format!("chunk of {} bytes exceeds body limit", size)));
                    }
                    if size == 0 {
                        self.state = ParseState::ChunkTrailer;
                    } else {
                        self.chunk_size = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let size = self.chunk_size;
                    let framed = size
                        .checked_add(2)
                        .ok_or_else(|| parse_error("chunk size out of range"))?;
                    if self.buf.len() < framed {
                        return Ok(Progress::NeedMore);
                    }
                    if &self.buf[size..framed] != b"\r\n" {
                        return Err(parse_error("chunk data not terminated by CRLF"));
                    }
                    let payload = self.buf.split_to(size);
                    self.body.extend_from_slice(&payload);
                    self.buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_LINE_LEN {
                            return Err(parse_error("trailer line too long"));
                        }
                        return Ok(Progress::NeedMore);
                    };
                    if line_end == 0 {
                        self.buf.advance(2);
                        if !self.buf.is_empty() {
                            warn!(
                                surplus = self.buf.len(),
                                "discarding bytes after last chunk"
                            );
                            self.buf.clear();
                        }
                        self.finish(handler);
                    } else {
                        let line = self.buf.split_to(line_end + 2);
                        let text = std::str::from_utf8(&line[..line_end])
                            .map_err(|_| parse_error("invalid trailer UTF-8"))?;
                        let (name, value) = parse_header_line(text)?;
                        handler.trailer(name, value);
                    }
                }
                ParseState::Complete => return Ok(Progress::Complete),
            }
        }
    }

    fn parse_head<H: H1ResponseHandler>(
        &mut self,
        head: &[u8],
        handler: &mut H,
    ) -> Result<()> {
        let text =
            std::str::from_utf8(head).map_err(|_| parse_error("invalid header block UTF-8"))?;
        let mut lines = text.split("\r\n");
        let (version, code, phrase) = parse_status_line(lines.next().unwrap_or(""))?;

        // Interim 1xx responses precede the real one; 101 ends HTTP/1.1 on this socket.
        if (100..200).contains(&code) && code != 101 {
            trace!(code, "skipping interim response");
            for line in lines {
                parse_header_line(line)?;
            }
            return Ok(());
        }

        handler.status(version, code, phrase);
        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        for line in lines {
            let (name, value) = parse_header_line(line)?;
            if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value
                    .rsplit(',')
                    .next()
                    .map(|c| c.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false);
            } else if name.eq_ignore_ascii_case("content-length") {
                let len = value
                    .parse::<u64>()
                    .map_err(|_| parse_error(format!("invalid Content-Length {:?}", value)))?;
                if content_length.is_some_and(|prev| prev != len) {
                    return Err(parse_error("conflicting Content-Length headers"));
                }
                body_len(len)?;
                content_length = Some(len);
            }
            handler.header(name, value);
        }
        self.content_length = content_length;
        self.chunked = chunked;

        let no_body = !self.body_allowed || code == 204 || code == 304 || code == 101;
        self.state = if no_body {
            ParseState::Complete
        } else if chunked {
            ParseState::ChunkSize
        } else {
            match content_length {
                Some(len) if len > 0 => ParseState::FixedBody,
                _ => ParseState::Complete,
            }
        };
        if self.state == ParseState::Complete {
            self.finish(handler);
        }
        Ok(())
    }

    fn finish<H: H1ResponseHandler>(&mut self, handler: &mut H) {
        self.state = ParseState::Complete;
        let body = std::mem::take(&mut self.body).freeze();
        handler.complete(body);
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
