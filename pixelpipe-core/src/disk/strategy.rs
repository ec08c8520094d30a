//! HTTP cache-control evaluation for disk cache entries
//!
//! Given a network request and the metadata of a cached response, decide
//! whether the cached bytes can be served as they are, need a conditional
//! revalidation, or must be replaced by a full fetch.
//!
//! One deliberate deviation from RFC 7234: a cached response with no
//! freshness directives and no validators is treated as fresh forever.

use crate::disk::metadata::CachedResponseMetadata;
use crate::fetch::network::{NetworkRequest, NetworkResponse};
use crate::headers::Headers;
use chrono::DateTime;

/// Parsed `Cache-Control` (and `Pragma: no-cache`) directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age_seconds: Option<i64>,
    pub s_max_age_seconds: Option<i64>,
    pub is_private: bool,
    pub is_public: bool,
    pub must_revalidate: bool,
    pub max_stale_seconds: Option<i64>,
    pub min_fresh_seconds: Option<i64>,
    pub only_if_cached: bool,
    pub immutable: bool,
}

impl CacheControl {
    pub fn parse(headers: &Headers) -> Self {
        let mut control = CacheControl::default();

        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case("Pragma") {
                if value.to_ascii_lowercase().contains("no-cache") {
                    control.no_cache = true;
                }
                continue;
            }
            if !name.eq_ignore_ascii_case("Cache-Control") {
                continue;
            }

            for directive in value.split(',') {
                let directive = directive.trim();
                if directive.is_empty() {
                    continue;
                }
                let (name, argument) = match directive.split_once('=') {
                    Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                let seconds = || argument.and_then(parse_seconds);

                match name.to_ascii_lowercase().as_str() {
                    "no-cache" => control.no_cache = true,
                    "no-store" => control.no_store = true,
                    "max-age" => control.max_age_seconds = seconds(),
                    "s-maxage" => control.s_max_age_seconds = seconds(),
                    "private" => control.is_private = true,
                    "public" => control.is_public = true,
                    "must-revalidate" => control.must_revalidate = true,
                    // A bare max-stale accepts any staleness
                    "max-stale" => control.max_stale_seconds = Some(seconds().unwrap_or(i64::MAX / 1000)),
                    "min-fresh" => control.min_fresh_seconds = seconds(),
                    "only-if-cached" => control.only_if_cached = true,
                    "immutable" => control.immutable = true,
                    _ => {}
                }
            }
        }

        control
    }
}

fn parse_seconds(value: &str) -> Option<i64> {
    // Saturate instead of failing on absurdly large values
    match value.parse::<i64>() {
        Ok(seconds) => Some(seconds.max(0)),
        Err(_) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            Some(i32::MAX as i64)
        }
        Err(_) => None,
    }
}

/// Milliseconds since the epoch of an HTTP date header
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.timestamp_millis())
}

/// Outcome of evaluating a cached response against a request
///
/// | `network_request` | `cache_response` | meaning |
/// |---|---|---|
/// | `None` | `Some` | serve the cached entry |
/// | `Some` | `Some` | conditional request; on 304 merge headers and keep the body |
/// | `Some` | `None` | full fetch |
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    pub network_request: Option<NetworkRequest>,
    pub cache_response: Option<CachedResponseMetadata>,
}

impl CacheStrategy {
    pub fn compute(
        request: &NetworkRequest,
        cached: Option<&CachedResponseMetadata>,
        now_millis: i64,
    ) -> Self {
        let network = |request: NetworkRequest| CacheStrategy {
            network_request: Some(request),
            cache_response: None,
        };

        let Some(cached) = cached else {
            return network(request.clone());
        };

        let request_control = CacheControl::parse(&request.headers);
        let response_control = CacheControl::parse(&cached.headers);

        if request_control.no_store || response_control.no_store {
            return network(request.clone());
        }

        // The caller asked for validation on its own terms
        if request_control.no_cache
            || request.headers.contains("If-None-Match")
            || request.headers.contains("If-Modified-Since")
        {
            return network(request.clone());
        }

        let validators = Validators::from_headers(&cached.headers);

        if !response_control.no_cache {
            let fresh = match freshness_lifetime_millis(cached, &response_control, &validators, &request.url) {
                None => true,
                Some(lifetime) => {
                    let lifetime = match request_control.max_age_seconds {
                        Some(max_age) => lifetime.min(max_age.saturating_mul(1000)),
                        None => lifetime,
                    };
                    let min_fresh = request_control
                        .min_fresh_seconds
                        .map(|s| s.saturating_mul(1000))
                        .unwrap_or(0);
                    let max_stale = match request_control.max_stale_seconds {
                        Some(s) if !response_control.must_revalidate => s.saturating_mul(1000),
                        _ => 0,
                    };
                    let age = response_age_millis(cached, &validators, now_millis);
                    age.saturating_add(min_fresh) < lifetime.saturating_add(max_stale)
                }
            };

            if fresh {
                return CacheStrategy {
                    network_request: None,
                    cache_response: Some(cached.clone()),
                };
            }
        }

        let (condition_name, condition_value) = if let Some(etag) = validators.etag {
            ("If-None-Match", etag)
        } else if let Some(last_modified) = validators.last_modified {
            ("If-Modified-Since", last_modified)
        } else if let Some(date) = validators.served_date {
            ("If-Modified-Since", date)
        } else {
            return network(request.clone());
        };

        let mut conditional = request.clone();
        conditional.headers.set(condition_name, condition_value);
        CacheStrategy {
            network_request: Some(conditional),
            cache_response: Some(cached.clone()),
        }
    }

    /// Whether a response may be written to the disk cache
    pub fn is_cacheable(request: &NetworkRequest, response: &NetworkResponse) -> bool {
        is_cacheable_status(response.code, &response.headers)
            && Self::allows_storage(request, &response.headers)
    }

    /// Storage directives only, ignoring the status code
    pub fn allows_storage(request: &NetworkRequest, response_headers: &Headers) -> bool {
        !CacheControl::parse(&request.headers).no_store
            && !CacheControl::parse(response_headers).no_store
            && response_headers.get("Vary").map(str::trim) != Some("*")
    }
}

fn is_cacheable_status(code: u16, headers: &Headers) -> bool {
    match code {
        200 | 203 | 204 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501 => true,
        302 | 307 => {
            let control = CacheControl::parse(headers);
            headers.contains("Expires")
                || control.max_age_seconds.is_some()
                || control.is_public
                || control.is_private
        }
        _ => false,
    }
}

struct Validators<'a> {
    served_date: Option<&'a str>,
    served_date_millis: Option<i64>,
    expires_millis: Option<i64>,
    last_modified: Option<&'a str>,
    last_modified_millis: Option<i64>,
    etag: Option<&'a str>,
    age_seconds: Option<i64>,
}

impl<'a> Validators<'a> {
    fn from_headers(headers: &'a Headers) -> Self {
        let served_date = headers.get("Date");
        let last_modified = headers.get("Last-Modified");
        Self {
            served_date,
            served_date_millis: served_date.and_then(parse_http_date),
            expires_millis: headers.get("Expires").and_then(parse_http_date),
            last_modified,
            last_modified_millis: last_modified.and_then(parse_http_date),
            etag: headers.get("ETag"),
            age_seconds: headers.get("Age").and_then(|age| parse_seconds(age.trim())),
        }
    }

    fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// `None` means the response never goes stale
fn freshness_lifetime_millis(
    cached: &CachedResponseMetadata,
    control: &CacheControl,
    validators: &Validators<'_>,
    url: &str,
) -> Option<i64> {
    if let Some(max_age) = control.max_age_seconds {
        return Some(max_age.saturating_mul(1000));
    }

    if let Some(expires) = validators.expires_millis {
        let served = validators
            .served_date_millis
            .unwrap_or(cached.received_at_millis);
        return Some((expires - served).max(0));
    }

    if let Some(last_modified) = validators.last_modified_millis {
        if !url.contains('?') {
            let served = validators.served_date_millis.unwrap_or(cached.sent_at_millis);
            return Some(((served - last_modified) / 10).max(0));
        }
    }

    if validators.has_validators() || control.no_cache {
        return Some(0);
    }

    None
}

fn response_age_millis(
    cached: &CachedResponseMetadata,
    validators: &Validators<'_>,
    now_millis: i64,
) -> i64 {
    let apparent_received_age = validators
        .served_date_millis
        .map(|served| (cached.received_at_millis - served).max(0))
        .unwrap_or(0);
    let received_age = match validators.age_seconds {
        Some(age) => apparent_received_age.max(age.saturating_mul(1000)),
        None => apparent_received_age,
    };
    let response_duration = (cached.received_at_millis - cached.sent_at_millis).max(0);
    let resident_duration = (now_millis - cached.received_at_millis).max(0);
    received_age + response_duration + resident_duration
}

/// Merge the headers of a 304 response into the cached ones
///
/// Cached `Warning: 1xx` headers are dropped. Content-describing and
/// hop-by-hop headers keep their cached values; every other header the
/// network response carries replaces the cached one.
pub fn combine_headers(cached: &Headers, network: &Headers) -> Headers {
    let mut combined = Headers::new();

    for (name, value) in cached.iter() {
        if name.eq_ignore_ascii_case("Warning") && value.starts_with('1') {
            continue;
        }
        if is_content_specific(name) || !is_end_to_end(name) || !network.contains(name) {
            combined.add(name, value);
        }
    }

    for (name, value) in network.iter() {
        if !is_content_specific(name) && is_end_to_end(name) {
            combined.add(name, value);
        }
    }

    combined
}

fn is_content_specific(name: &str) -> bool {
    ["Content-Length", "Content-Encoding", "Content-Type"]
        .iter()
        .any(|n| n.eq_ignore_ascii_case(name))
}

fn is_end_to_end(name: &str) -> bool {
    ![
        "Connection",
        "Keep-Alive",
        "Proxy-Authenticate",
        "Proxy-Authorization",
        "TE",
        "Trailers",
        "Transfer-Encoding",
        "Upgrade",
    ]
    .iter()
    .any(|n| n.eq_ignore_ascii_case(name))
}
