/*
 * method.rs
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

//! HTTP request method.

use std::fmt;
use std::str::FromStr;

use crate::error::HttpError;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpError;

    /// Method tokens are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "CONNECT" => Method::Connect,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            other => {
                return Err(HttpError::Protocol(format!(
                    "invalid HTTP method: {:?}",
                    other
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods() {
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn rejects_unknown_and_lowercase() {
        assert!(matches!("get".parse::<Method>(), Err(HttpError::Protocol(_))));
        assert!(matches!("BREW".parse::<Method>(), Err(HttpError::Protocol(_))));
    }
}
