/*
 * connection.rs
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

//! One request/response exchange over an established stream.
//!
//! The request is written in full, then socket reads are pushed through the H1 parser until
//! the response completes. `Set-Cookie` headers go to the jar as they are parsed.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::{HttpError, Result};
use crate::http::cookie_jar::CookieJar;
use crate::http::h1::{H1ResponseHandler, Progress, ResponseParser};
use crate::http::method::Method;
use crate::http::request::Request;
use crate::http::response::Response;

const READ_CHUNK: usize = 8192;

/// Bridges parser callbacks to a `Response` under construction and the cookie jar.
struct ResponseCollector<'a> {
    response: Response,
    url: &'a Url,
    jar: Option<&'a Mutex<CookieJar>>,
}

impl H1ResponseHandler for ResponseCollector<'_> {
    fn status(&mut self, version: &str, code: u16, phrase: &str) {
        self.response.version = version.to_string();
        self.response.code = code;
        self.response.phrase = phrase.to_string();
    }

    fn header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("set-cookie") {
            if let Some(jar) = self.jar {
                let mut jar = jar.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = jar.add_cookie(value, self.url) {
                    warn!(url = %self.url, error = %e, "ignoring cookie");
                }
            }
        }
        self.response
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn trailer(&mut self, name: &str, value: &str) {
        self.response
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn complete(&mut self, body: Bytes) {
        self.response.body = body;
    }
}

/// Write `request` to `stream` and read its response. When `jar` is given, every valid
/// `Set-Cookie` header of the response is stored in it.
pub async fn exchange<S>(
    stream: &mut S,
    request: &Request,
    jar: Option<&Mutex<CookieJar>>,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&request.to_bytes())
        .await
        .map_err(|e| HttpError::transport("write request", e))?;
    stream
        .flush()
        .await
        .map_err(|e| HttpError::transport("write request", e))?;

    let mut parser = if request.method == Method::Head {
        ResponseParser::without_body()
    } else {
        ResponseParser::new()
    };
    let mut collector = ResponseCollector {
        response: Response::new(),
        url: &request.url,
        jar,
    };
    let mut tmp = [0u8; READ_CHUNK];
    loop {
        let n = stream
            .read(&mut tmp)
            .await
            .map_err(|e| HttpError::transport("read response", e))?;
        if n == 0 {
            return Err(HttpError::transport(
                "read response",
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before the response completed",
                ),
            ));
        }
        if parser.receive(&tmp[..n], &mut collector)? == Progress::Complete {
            break;
        }
    }
    debug!(
        url = %request.url,
        code = collector.response.code,
        body_len = collector.response.body.len(),
        "response complete"
    );
    Ok(collector.response)
}
