use chrono::Local;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Append one query record to the tab-delimited usage log. Best-effort and
/// informational: retrieval never reads this back.
pub fn log_usage(
    log_path: &Path,
    query: &str,
    results: usize,
    sessions_searched: usize,
    exact_matches: usize,
) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S");
    let query_json = serde_json::to_string(query).unwrap_or_else(|_| "\"\"".to_string());
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(
        file,
        "{timestamp}\tquery={query_json}\tresults={results}\tsessions={sessions_searched}\texact={exact_matches}"
    )?;
    Ok(())
}

/// Aggregates over the usage log.
#[derive(Debug, Default)]
pub struct UsageStats {
    pub total_searches: usize,
    pub searches_today: usize,
    pub total_results: usize,
    pub exact_phrase_hits: usize,
    pub first_used: Option<String>,
    pub last_used: Option<String>,
    pub recent_queries: Vec<RecentQuery>,
}

#[derive(Debug)]
pub struct RecentQuery {
    pub time: String,
    pub results: usize,
    pub query: String,
}

impl std::fmt::Display for UsageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Usage stats")?;
        writeln!(f, "  Total searches:      {}", self.total_searches)?;
        writeln!(f, "  Searches today:      {}", self.searches_today)?;
        writeln!(f, "  Total results found: {}", self.total_results)?;
        writeln!(f, "  Exact phrase hits:   {}", self.exact_phrase_hits)?;
        writeln!(f, "  First used:          {}", self.first_used.as_deref().unwrap_or("n/a"))?;
        writeln!(f, "  Last used:           {}", self.last_used.as_deref().unwrap_or("n/a"))?;
        if !self.recent_queries.is_empty() {
            writeln!(f, "  Recent queries:")?;
            for q in &self.recent_queries {
                writeln!(f, "    {} | {} results | {}", q.time, q.results, q.query)?;
            }
        }
        Ok(())
    }
}

/// Summarize the usage log. A missing log is zero stats, not an error.
pub fn read_stats(log_path: &Path) -> Result<UsageStats> {
    let data = match std::fs::read_to_string(log_path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UsageStats::default()),
        Err(e) => return Err(e.into()),
    };

    let today = Local::now().format("%Y-%m-%d").to_string();
    let mut stats = UsageStats::default();
    let mut recent: Vec<RecentQuery> = Vec::new();

    for line in data.lines() {
        let mut parts = line.split('\t');
        let Some(timestamp) = parts.next() else {
            continue;
        };
        stats.total_searches += 1;
        if timestamp.starts_with(&today) {
            stats.searches_today += 1;
        }
        if stats.first_used.is_none() {
            stats.first_used = Some(timestamp.to_string());
        }
        stats.last_used = Some(timestamp.to_string());

        let mut results = 0usize;
        let mut query = String::new();
        for part in parts {
            if let Some(v) = part.strip_prefix("results=") {
                results = v.parse().unwrap_or(0);
                stats.total_results += results;
            } else if let Some(v) = part.strip_prefix("exact=") {
                stats.exact_phrase_hits += v.parse::<usize>().unwrap_or(0);
            } else if let Some(v) = part.strip_prefix("query=") {
                query = serde_json::from_str::<String>(v).unwrap_or_else(|_| v.to_string());
            }
        }

        let time = timestamp.split('T').nth(1).unwrap_or(timestamp).to_string();
        recent.push(RecentQuery {
            time,
            results,
            query,
        });
    }

    let keep = recent.len().saturating_sub(5);
    stats.recent_queries = recent.split_off(keep);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_and_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("memory").join("usage.log");

        log_usage(&log, "what about auth?", 3, 12, 1).unwrap();
        log_usage(&log, "wlxc runtime", 0, 5, 0).unwrap();

        let stats = read_stats(&log).unwrap();
        assert_eq!(stats.total_searches, 2);
        assert_eq!(stats.searches_today, 2);
        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.exact_phrase_hits, 1);
        assert_eq!(stats.recent_queries.len(), 2);
        assert_eq!(stats.recent_queries[1].query, "wlxc runtime");
    }

    #[test]
    fn test_tab_in_query_stays_one_record() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("usage.log");

        // JSON-encoding the query keeps the record's tab structure intact
        log_usage(&log, "a\tb query", 1, 1, 0).unwrap();
        let stats = read_stats(&log).unwrap();
        assert_eq!(stats.total_searches, 1);
        assert_eq!(stats.recent_queries[0].query, "a\tb query");
    }

    #[test]
    fn test_missing_log_is_empty_stats() {
        let stats = read_stats(Path::new("/nonexistent/usage.log")).unwrap();
        assert_eq!(stats.total_searches, 0);
        assert!(stats.first_used.is_none());
    }

    #[test]
    fn test_recent_queries_keep_last_five() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("usage.log");
        for i in 0..8 {
            log_usage(&log, &format!("query {i}"), i, 1, 0).unwrap();
        }
        let stats = read_stats(&log).unwrap();
        assert_eq!(stats.recent_queries.len(), 5);
        assert_eq!(stats.recent_queries[0].query, "query 3");
        assert_eq!(stats.recent_queries[4].query, "query 7");
    }
}
