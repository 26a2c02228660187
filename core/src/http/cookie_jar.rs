/*
 * cookie_jar.rs
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

//! Cookie jar: domain → path → cookie key → cookie.
//!
//! Expired cookies are dropped lazily when a lookup touches them; a path or domain level
//! left empty by a removal is pruned straight away.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::trace;
use url::Url;

use crate::error::Result;
use crate::http::cookie::{Cookie, CookieKey};

type PathMap = HashMap<String, HashMap<CookieKey, Cookie>>;

#[derive(Debug, Default)]
pub struct CookieJar {
    domains: HashMap<String, PathMap>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Set-Cookie` value received from `url` and store it. Returns false when the
    /// header carried no cookie (empty name); errors when the cookie was rejected.
    pub fn add_cookie(&mut self, set_cookie: &str, url: &Url) -> Result<bool> {
        self.add_cookie_at(set_cookie, url, Utc::now())
    }

    pub fn add_cookie_at(
        &mut self,
        set_cookie: &str,
        url: &Url,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match Cookie::parse_at(set_cookie, url, now)? {
            Some(cookie) => {
                self.insert(cookie);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Store a cookie as-is (e.g. restored from persistence), replacing any cookie with
    /// the same name, domain, and path.
    pub fn insert(&mut self, cookie: Cookie) {
        trace!(name = %cookie.name, domain = %cookie.domain, path = %cookie.path, "storing cookie");
        self.domains
            .entry(cookie.domain.clone())
            .or_default()
            .entry(cookie.path.clone())
            .or_default()
            .insert(cookie.key(), cookie);
    }

    /// Cookies to send with a request to `url`, longest path first.
    pub fn get_cookies(&mut self, url: &Url) -> Vec<Cookie> {
        self.get_cookies_at(url, Utc::now())
    }

    pub fn get_cookies_at(&mut self, url: &Url, now: DateTime<Utc>) -> Vec<Cookie> {
        let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
            return Vec::new();
        };
        let secure_channel = url.scheme() == "https";
        let domains = candidate_domains(&host);
        let paths = candidate_paths(url.path());

        let mut selected = Vec::new();
        let mut expired: Vec<CookieKey> = Vec::new();
        for domain in &domains {
            let Some(path_map) = self.domains.get_mut(domain) else {
                continue;
            };
            for path in &paths {
                let Some(cookies) = path_map.get_mut(path) else {
                    continue;
                };
                for (key, cookie) in cookies.iter_mut() {
                    if cookie.is_expired(now) {
                        expired.push(key.clone());
                        continue;
                    }
                    if cookie.host_only && cookie.domain != host {
                        continue;
                    }
                    if cookie.secure && !secure_channel {
                        continue;
                    }
                    cookie.last_access = now;
                    selected.push(cookie.clone());
                }
            }
        }
        for key in &expired {
            self.remove(key);
        }
        selected.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.created.cmp(&b.created))
        });
        selected
    }

    /// Remove one cookie, pruning empty path and domain levels.
    pub fn remove(&mut self, key: &CookieKey) -> Option<Cookie> {
        let path_map = self.domains.get_mut(&key.domain)?;
        let cookies = path_map.get_mut(&key.path)?;
        let removed = cookies.remove(key);
        if cookies.is_empty() {
            path_map.remove(&key.path);
            if path_map.is_empty() {
                self.domains.remove(&key.domain);
            }
        }
        if removed.is_some() {
            trace!(name = %key.name, domain = %key.domain, path = %key.path, "removed cookie");
        }
        removed
    }

    /// Every stored cookie, for persistence by the caller.
    pub fn all_cookies(&self) -> Vec<Cookie> {
        self.domains
            .values()
            .flat_map(|paths| paths.values())
            .flat_map(|cookies| cookies.values())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.domains
            .values()
            .flat_map(|paths| paths.values())
            .map(|cookies| cookies.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    /// Number of domain entries; empty domains are never retained.
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }
}

/// The host and each parent domain with at least two labels. IP hosts only yield
/// themselves.
pub fn candidate_domains(host: &str) -> Vec<String> {
    let mut domains = vec![host.to_string()];
    if host.starts_with('[') || host.parse::<std::net::IpAddr>().is_ok() {
        return domains;
    }
    let mut rest = host;
    while let Some(dot) = rest.find('.') {
        rest = &rest[dot + 1..];
        if !rest.contains('.') {
            break;
        }
        domains.push(rest.to_string());
    }
    domains
}

/// `/`, every proper prefix of `path` ending before a `/`, and `path` itself.
pub fn candidate_paths(path: &str) -> Vec<String> {
    let mut paths = vec!["/".to_string()];
    if path.is_empty() || path == "/" {
        return paths;
    }
    for (i, b) in path.bytes().enumerate().skip(1) {
        if b == b'/' {
            let prefix = &path[..i];
            if !paths.iter().any(|p| p == prefix) {
                paths.push(prefix.to_string());
            }
        }
    }
    if !paths.iter().any(|p| p == path) {
        paths.push(path.to_string());
    }
    paths
}
