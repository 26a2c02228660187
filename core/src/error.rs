/*
 * error.rs
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

//! Client errors.
//!
//! Every failure surfaced to a caller is one of these kinds. Transport errors keep the
//! underlying `io::Error` as their source so callers can inspect the OS-level cause.

use std::io;
use std::time::Duration;

/// Errors from sending a request, establishing a connection, or parsing a response.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Unsupported URL scheme, invalid method, or a request that cannot be put on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connect, TLS handshake, read, or write failure on the socket.
    #[error("transport error: {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The proxy refused the CONNECT request or the tunnel socket failed.
    #[error("proxy tunnel error: {0}")]
    ProxyTunnel(String),

    /// Malformed status line, header line, or body framing.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed `Set-Cookie` value or a `Domain` attribute that does not match the host.
    #[error("cookie parse error: {0}")]
    CookieParse(String),

    /// The request did not complete within the configured request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl HttpError {
    pub fn transport(context: &'static str, source: io::Error) -> Self {
        Self::Transport { context, source }
    }

    /// True for failures that leave the socket in an unknown state.
    pub fn is_transport(&self) -> bool {
        matches!(self, HttpError::Transport { .. } | HttpError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;
