//! Small shared helpers: query-flag parsing, size formatting, and retry
//! backoff.

use std::time::Duration;

/// Query parameters with presence preserved, so `?flag` and an absent flag
/// stay distinguishable.
#[derive(Debug, Default)]
pub(crate) struct RawQuery {
    pairs: Vec<(String, String)>,
}

impl RawQuery {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self { pairs }
    }

    /// First value for `name`, if the parameter appeared at all.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Boolean query-flag lookup.
///
/// Absent flag yields `default`; `?flag` with no value is true;
/// `no|false|0|off` (case insensitive) is false; everything else is true.
pub(crate) fn query_flag(query: &RawQuery, name: &str, default: bool) -> bool {
    let Some(value) = query.first(name) else {
        return default;
    };
    if value.is_empty() {
        return true;
    }
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "no" | "false" | "0" | "off"
    )
}

/// Format a byte count in base-10 units, e.g. `337 B`, `12.3 KB`.
pub(crate) fn human_bytes(size: i64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if size < 1000 {
        return format!("{size} B");
    }
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Sleeps exponentially longer between failing attempts.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    delay: Option<Duration>,
    min: Duration,
    max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            delay: None,
            min: Duration::from_millis(5),
            max: Duration::from_secs(1),
        }
    }
}

impl ExponentialBackoff {
    /// Call on failure; each call sleeps twice as long, up to the maximum.
    pub async fn wait(&mut self) {
        let next = match self.delay {
            None => self.min,
            Some(delay) => (delay * 2).min(self.max),
        };
        self.delay = Some(next);
        tokio::time::sleep(next).await;
    }

    /// Whether the wait time has reached the maximum.
    pub fn maxed(&self) -> bool {
        self.delay == Some(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(s: &str) -> RawQuery {
        RawQuery::parse(Some(s))
    }

    #[test]
    fn query_flag_truth_table() {
        assert!(!query_flag(&RawQuery::parse(None), "flag", false));
        assert!(query_flag(&RawQuery::parse(None), "flag", true));
        assert!(query_flag(&query("flag"), "flag", false));
        assert!(query_flag(&query("flag="), "flag", false));
        assert!(!query_flag(&query("flag=NO"), "flag", true));
        assert!(!query_flag(&query("flag=false"), "flag", true));
        assert!(!query_flag(&query("flag=0"), "flag", true));
        assert!(!query_flag(&query("flag=off"), "flag", true));
        assert!(query_flag(&query("flag=anything else"), "flag", false));
    }

    #[test]
    fn query_first_value_wins() {
        assert!(!query_flag(&query("flag=no&flag=yes"), "flag", true));
    }

    #[test]
    fn human_bytes_base10() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(337), "337 B");
        assert_eq!(human_bytes(1337), "1.3 KB");
        assert_eq!(human_bytes(2_500_000), "2.5 MB");
        assert_eq!(human_bytes(3_000_000_000), "3.0 GB");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_to_max() {
        let mut backoff = ExponentialBackoff::default();
        backoff.wait().await;
        assert!(!backoff.maxed());
        for _ in 0..10 {
            backoff.wait().await;
        }
        assert!(backoff.maxed());
    }
}
