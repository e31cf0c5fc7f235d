//! Credential store for authenticated extraction.
//!
//! Browser-exported cookies arrive as JSON and leave as the Netscape
//! `cookies.txt` format yt-dlp consumes. The store owns that file, answers
//! "is there a credential set right now", and pushes a change notification
//! whenever the file is replaced or cleared so dependent state (the result
//! cache) can be invalidated. Nothing here watches the filesystem; ingestion
//! is push-only through the API.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;

pub const COOKIES_FILE: &str = "cookies.txt";

fn default_cookie_path() -> String {
    "/".to_owned()
}

/// One cookie as exported by browser devtools or a cookie extension.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCookie {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "expirationDate", alias = "expires")]
    pub expiration_date: Option<f64>,
}

type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// Owns the cookie file and notifies subscribers on every credential change.
pub struct CookieStore {
    path: PathBuf,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl CookieStore {
    /// `data_dir` is created lazily on the first write.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(COOKIES_FILE),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener invoked after every successful credential
    /// change (replace or clear).
    pub fn on_change(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Path to the current cookie file, if one is present.
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.path.exists().then(|| self.path.clone())
    }

    /// Number of cookie entries in the current file (non-comment lines).
    pub fn count(&self) -> usize {
        match fs::read_to_string(&self.path) {
            Ok(content) => content
                .lines()
                .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
                .count(),
            Err(_) => 0,
        }
    }

    /// Accepts the raw JSON payload from a browser export: either a bare
    /// array of cookies or an object carrying a `cookies` array.
    pub fn replace_from_json(&self, payload: &Value) -> Result<usize> {
        let cookies: Vec<RawCookie> = match payload {
            Value::Array(_) => serde_json::from_value(payload.clone())
                .context("parsing cookie array")?,
            Value::Object(map) => match map.get("cookies") {
                Some(inner @ Value::Array(_)) => serde_json::from_value(inner.clone())
                    .context("parsing cookies field")?,
                _ => bail!("cookie object must carry a `cookies` array"),
            },
            _ => bail!("cookie payload must be an array or an object with a `cookies` array"),
        };
        self.replace(&cookies)
    }

    /// Rewrites the cookie file from `cookies` and notifies listeners.
    /// Returns the number of Netscape lines written. Cookies missing a name,
    /// value, or domain are skipped; `x.com` cookies are duplicated onto
    /// `twitter.com` because the extractor may resolve either host.
    pub fn replace(&self, cookies: &[RawCookie]) -> Result<usize> {
        let mut lines = Vec::new();

        for cookie in cookies {
            if cookie.name.is_empty() || cookie.value.is_empty() || cookie.domain.is_empty() {
                eprintln!("skipping incomplete cookie entry (missing name/value/domain)");
                continue;
            }

            let domain = if cookie.domain.starts_with('.') {
                cookie.domain.clone()
            } else {
                format!(".{}", cookie.domain)
            };
            lines.push(netscape_line(&domain, cookie));

            if let Some(prefix) = domain.strip_suffix(".x.com") {
                lines.push(netscape_line(&format!("{prefix}.twitter.com"), cookie));
            }
        }

        let written = lines.len();
        self.write_file(&lines)?;
        self.notify();
        Ok(written)
    }

    /// Deletes the cookie file. Listeners are only notified when a file was
    /// actually removed.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                self.notify();
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing {}", self.path.display()))
            }
        }
    }

    fn write_file(&self, lines: &[String]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .context("cookie file path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;

        // Write-then-rename so the extractor never reads a half-written file.
        let mut file = NamedTempFile::new_in(parent).context("creating temporary cookie file")?;
        writeln!(file, "# Netscape HTTP Cookie File")?;
        writeln!(file, "# This is a generated file! Do not edit.")?;
        writeln!(file)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn notify(&self) {
        for listener in self.listeners.lock().iter() {
            listener();
        }
    }
}

fn netscape_line(domain: &str, cookie: &RawCookie) -> String {
    let flag = if domain.starts_with('.') { "TRUE" } else { "FALSE" };
    let secure = if cookie.secure { "TRUE" } else { "FALSE" };
    let expiration = cookie
        .expiration_date
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value as i64)
        .unwrap_or(0);
    format!(
        "{domain}\t{flag}\t{path}\t{secure}\t{expiration}\t{name}\t{value}",
        path = cookie.path,
        name = cookie.name,
        value = cookie.value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn sample_cookie(domain: &str, name: &str, value: &str) -> RawCookie {
        RawCookie {
            domain: domain.to_owned(),
            name: name.to_owned(),
            value: value.to_owned(),
            path: "/".to_owned(),
            secure: true,
            expiration_date: Some(1_900_000_000.5),
        }
    }

    #[test]
    fn replace_writes_netscape_lines_with_twitter_duplicates() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());

        let written = store
            .replace(&[sample_cookie(".x.com", "auth_token", "secret")])
            .unwrap();
        assert_eq!(written, 2);

        let content = fs::read_to_string(dir.path().join(COOKIES_FILE)).unwrap();
        assert!(content.starts_with("# Netscape HTTP Cookie File"));
        assert!(content.contains(".x.com\tTRUE\t/\tTRUE\t1900000000\tauth_token\tsecret"));
        assert!(content.contains(".twitter.com\tTRUE\t/\tTRUE\t1900000000\tauth_token\tsecret"));
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn bare_domains_gain_a_leading_dot() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        store
            .replace(&[sample_cookie("x.com", "ct0", "csrf")])
            .unwrap();

        let content = fs::read_to_string(dir.path().join(COOKIES_FILE)).unwrap();
        assert!(content.contains(".x.com\tTRUE"));
    }

    #[test]
    fn incomplete_cookies_are_skipped() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        let written = store
            .replace(&[
                sample_cookie(".x.com", "", "orphan-value"),
                sample_cookie(".example.org", "kept", "yes"),
            ])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn missing_expiration_becomes_zero() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        let mut cookie = sample_cookie(".example.org", "session", "v");
        cookie.expiration_date = None;
        store.replace(&[cookie]).unwrap();

        let content = fs::read_to_string(dir.path().join(COOKIES_FILE)).unwrap();
        assert!(content.contains("\t0\tsession\tv"));
    }

    #[test]
    fn json_payload_accepts_array_and_wrapper_object() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());

        let array = json!([{"domain": ".x.com", "name": "a", "value": "1"}]);
        assert_eq!(store.replace_from_json(&array).unwrap(), 2);

        let wrapped = json!({"cookies": [{"domain": ".example.org", "name": "b", "value": "2"}]});
        assert_eq!(store.replace_from_json(&wrapped).unwrap(), 1);

        assert!(store.replace_from_json(&json!("nope")).is_err());
        assert!(store.replace_from_json(&json!({"cookies": "nope"})).is_err());
    }

    #[test]
    fn clear_removes_the_file_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        store
            .replace(&[sample_cookie(".x.com", "auth", "t")])
            .unwrap();
        assert!(store.cookie_file().is_some());

        store.clear().unwrap();
        assert!(store.cookie_file().is_none());
        assert_eq!(store.count(), 0);

        // A second clear is a no-op, not an error.
        store.clear().unwrap();
    }

    #[test]
    fn listeners_fire_on_replace_and_clear() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        let changes = Arc::new(AtomicUsize::new(0));
        {
            let changes = Arc::clone(&changes);
            store.on_change(move || {
                changes.fetch_add(1, Ordering::SeqCst);
            });
        }

        store
            .replace(&[sample_cookie(".x.com", "auth", "t")])
            .unwrap();
        store.clear().unwrap();
        // Clearing an already-absent file changes nothing.
        store.clear().unwrap();

        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }
}
