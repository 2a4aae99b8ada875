use std::collections::HashSet;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::runner::{RunnerError, WordlistSource};

/// Trim entries, drop blanks and `#` comments, and de-duplicate while
/// keeping first-seen order.
pub fn normalize_wordlist<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for line in lines {
        let word = line.as_ref().trim();
        if word.is_empty() || word.starts_with('#') {
            continue;
        }
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
    }
    out
}

pub async fn load_wordlist(source: &WordlistSource) -> Result<Vec<String>, RunnerError> {
    match source {
        WordlistSource::Inline(values) => Ok(normalize_wordlist(values)),
        WordlistSource::FilePath(path) => {
            let path = crate::config::expand_tilde(path)
                .to_string_lossy()
                .to_string();
            let handle = File::open(&path).await.map_err(|e| RunnerError::FileOpen {
                kind: "wordlist",
                path: path.clone(),
                source: e,
            })?;
            let mut raw = Vec::new();
            let mut lines = BufReader::new(handle).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => raw.push(line),
                    Ok(None) => break,
                    Err(e) => {
                        return Err(RunnerError::FileRead {
                            kind: "wordlist",
                            path,
                            source: e,
                        })
                    }
                }
            }
            Ok(normalize_wordlist(raw))
        }
    }
}
