// Token transport over cookies, headers and query parameters
// Decision: Lookup precedence is cookie, then header, then query
// Decision: Writes are accumulated in TokenWrite and applied to whatever response carries them

use axum::{
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponseParts, ResponseParts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::convert::Infallible;

use crate::config::TransportNames;

/// Where a token was found in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cookie,
    Header,
    Query,
}

/// Pending cookie/header writes produced by issue, refresh or clear
#[derive(Debug, Clone, Default)]
pub struct TokenWrite {
    cookies: Vec<Cookie<'static>>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl TokenWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.headers.is_empty()
    }

    pub(crate) fn push_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookies.push(cookie);
    }

    pub(crate) fn push_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    /// Cookies queued for `Set-Cookie`
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    /// Look up a queued cookie by name
    pub fn cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }

    /// Look up a queued header by name
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Append the later write after this one
    pub fn merge(mut self, other: TokenWrite) -> Self {
        self.cookies.extend(other.cookies);
        self.headers.extend(other.headers);
        self
    }

    /// Append all writes to a response header map
    pub fn apply(&self, headers: &mut HeaderMap) {
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.encoded().to_string()) {
                headers.append(header::SET_COOKIE, value);
            }
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

impl IntoResponseParts for TokenWrite {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.apply(res.headers_mut());
        Ok(res)
    }
}

/// Find the raw token in the request, honouring the lookup precedence
pub(crate) fn find_token(parts: &Parts, names: &TransportNames) -> Option<(String, TokenSource)> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(&names.jwt_cookie) {
        if !cookie.value().is_empty() {
            return Some((cookie.value().to_string(), TokenSource::Cookie));
        }
    }

    if let Some(value) = header_value(&parts.headers, &names.jwt_header) {
        return Some((value, TokenSource::Header));
    }

    query_value(parts, &names.jwt_query).map(|v| (v, TokenSource::Query))
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// First non-empty value of query parameter `name`
pub fn query_value(parts: &Parts, name: &str) -> Option<String> {
    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
