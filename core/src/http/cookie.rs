/*
 * cookie.rs
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

//! Cookie value type and `Set-Cookie` parsing (RFC 6265 section 5.2).

use std::net::IpAddr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HttpError, Result};

/// Identity of a stored cookie; a new cookie with the same key replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CookieKey {
    pub name: String,
    pub domain: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Bare cookie with no domain or path yet.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: String::new(),
            expires: None,
            created: now,
            last_access: now,
            host_only: false,
            secure: false,
            http_only: false,
        }
    }

    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.domain.clone(),
            path: self.path.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|t| t < now)
    }

    /// Parse a `Set-Cookie` value received from `url`.
    ///
    /// `Ok(None)` when the header carries no usable name (the header is ignored);
    /// `Err(CookieParse)` when a `Domain` attribute does not match the request host.
    pub fn parse(text: &str, url: &Url) -> Result<Option<Cookie>> {
        Self::parse_at(text, url, Utc::now())
    }

    pub fn parse_at(
        text: &str,
        url: &Url,
        now: DateTime<Utc>,
    ) -> Result<Option<Cookie>> {
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::CookieParse(format!("URL {} has no host", url)))?
            .to_ascii_lowercase();

        let (pair, attributes) = match text.find(';') {
            Some(i) => (&text[..i], &text[i + 1..]),
            None => (text, ""),
        };
        let Some(eq) = pair.find('=') else {
            return Ok(None);
        };
        let name = pair[..eq].trim();
        let value = pair[eq + 1..].trim();
        if name.is_empty() {
            return Ok(None);
        }

        let mut cookie = Cookie::new(name, value);
        let mut expires: Option<DateTime<Utc>> = None;
        let mut max_age: Option<DateTime<Utc>> = None;
        let mut domain: Option<String> = None;
        let mut path: Option<String> = None;

        for av in attributes.split(';') {
            let av = av.trim();
            if av.is_empty() {
                continue;
            }
            let (av_name, av_value) = match av.find('=') {
                Some(i) => (av[..i].trim(), av[i + 1..].trim()),
                None => (av, ""),
            };
            match av_name.to_ascii_lowercase().as_str() {
                "expires" => {
                    if let Some(t) = parse_cookie_date(av_value) {
                        expires = Some(t);
                    }
                }
                "max-age" => {
                    if let Some(t) = parse_max_age(av_value, now) {
                        max_age = Some(t);
                    }
                }
                "domain" => {
                    if av_value.is_empty() {
                        continue;
                    }
                    let d = av_value.strip_prefix('.').unwrap_or(av_value).to_ascii_lowercase();
                    if !domain_matches(&d, &host) {
                        return Err(HttpError::CookieParse(format!(
                            "cookie domain {} does not match host {}",
                            d, host
                        )));
                    }
                    domain = Some(d);
                }
                "path" => {
                    path = Some(if av_value.starts_with('/') {
                        av_value.to_string()
                    } else {
                        default_path(url.path())
                    });
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        cookie.expires = max_age.or(expires);
        match domain {
            // A bare label (e.g. "com") is only acceptable as the exact host, and then
            // it binds to that host alone.
            Some(d) if !d.contains('.') => {
                if d != host {
                    return Err(HttpError::CookieParse(format!(
                        "cookie domain {} is a public suffix",
                        d
                    )));
                }
                cookie.domain = host;
                cookie.host_only = true;
            }
            Some(d) => {
                cookie.domain = d;
                cookie.host_only = false;
            }
            None => {
                cookie.domain = host;
                cookie.host_only = true;
            }
        }
        cookie.path = path.unwrap_or_else(|| default_path(url.path()));
        cookie.created = now;
        cookie.last_access = now;
        Ok(Some(cookie))
    }
}

/// Accepts RFC 1123, RFC 850, and asctime forms; anything else is ignored.
fn parse_cookie_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Some(t.with_timezone(&Utc));
    }
    let s = s.trim_end_matches(" GMT").trim_end_matches(" UTC");
    const FORMATS: &[&str] = &[
        "%a, %d %b %Y %H:%M:%S",
        "%a, %d-%b-%Y %H:%M:%S",
        "%A, %d-%b-%y %H:%M:%S",
        "%a, %d-%b-%y %H:%M:%S",
        "%a %b %e %H:%M:%S %Y",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|t| t.and_utc())
}

/// Integer seconds, optionally negative. Non-positive values give an expiry already in
/// the past.
fn parse_max_age(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let negative = s.starts_with('-');
    let seconds = match digits.parse::<i64>() {
        Ok(n) => n,
        Err(_) if negative => return Some(DateTime::<Utc>::UNIX_EPOCH),
        Err(_) => return Some(DateTime::<Utc>::MAX_UTC),
    };
    if negative || seconds == 0 {
        return Some(DateTime::<Utc>::UNIX_EPOCH);
    }
    Some(
        TimeDelta::try_seconds(seconds)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

/// Domain-match: identical, or `host` ends with `.domain`. IP hosts match only themselves.
pub fn domain_matches(domain: &str, host: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if domain == host {
        return true;
    }
    host.len() > domain.len()
        && host.ends_with(&domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
        && !is_ip_literal(&host)
}

/// Default cookie path for a request path: everything before the right-most `/`,
/// or `/` when there is no second `/`.
pub fn default_path(uri_path: &str) -> String {
    if !uri_path.starts_with('/') {
        return "/".to_string();
    }
    match uri_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => uri_path[..i].to_string(),
    }
}
