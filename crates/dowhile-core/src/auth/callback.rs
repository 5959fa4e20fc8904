//! GitHub OAuth callback detection.
//!
//! After authorizing, GitHub redirects back to the app with `?code=...`
//! appended. The code is pulled out by name and the location is rewritten
//! without it so a reload does not replay a spent code.

use std::sync::{Arc, Mutex};

use url::{form_urlencoded, Url};

/// Query parameter GitHub uses for the authorization code
pub const CODE_PARAM: &str = "code";

/// Navigation state of the hosting front end.
pub trait History: Send + Sync {
    /// Current location as an absolute URL
    fn location(&self) -> String;

    /// Replace the visible location without reloading.
    fn push_state(&self, url: &str);
}

/// History kept in memory. Clones share the same stack.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemoryHistory {
    pub fn new(initial: &str) -> Self {
        Self {
            entries: Arc::new(Mutex::new(vec![initial.to_string()])),
        }
    }

    /// Every location visited, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl History for MemoryHistory {
    fn location(&self) -> String {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
            .unwrap_or_default()
    }

    fn push_state(&self, url: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCallback {
    /// Decoded authorization code
    pub code: String,
    /// The location with the `code` parameter removed
    pub clean_url: String,
}

/// Extract the OAuth code from a callback URL.
///
/// Returns `None` when the URL cannot be parsed or carries no non-empty
/// `code` parameter. Other query parameters and the fragment are kept.
pub fn extract_callback_code(location: &str) -> Option<OAuthCallback> {
    let mut url = Url::parse(location).ok()?;

    let code = url
        .query_pairs()
        .find(|(key, _)| key == CODE_PARAM)
        .map(|(_, value)| value.into_owned())?;

    if code.is_empty() {
        return None;
    }

    // Keep the other segments exactly as written rather than re-encoding them
    let query = url.query().unwrap_or_default().to_string();
    let kept: Vec<&str> = query
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_code_segment(segment))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&kept.join("&")));
    }

    Some(OAuthCallback {
        code,
        clean_url: url.into(),
    })
}

fn is_code_segment(segment: &str) -> bool {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(key, _)| key == CODE_PARAM)
        .unwrap_or(false)
}
