// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Process-wide `tracing` setup with glog-style single-line records:
//!
//! ```text
//! I20261017 09:14:03.052117 7 src/exec/hash_table/agg_hash_table.rs:412] message
//! ```
//!
//! Records go to the file named by `NOVAROCKS_HASHAGG_LOG_FILE`, or to
//! `novarocks_hashagg.log` under `NOVAROCKS_HASHAGG_LOG_DIR`, and to stderr
//! when neither is set.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Local};
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

pub const LOG_FILE_ENV: &str = "NOVAROCKS_HASHAGG_LOG_FILE";
pub const LOG_DIR_ENV: &str = "NOVAROCKS_HASHAGG_LOG_DIR";
const LOG_FILE_NAME: &str = "novarocks_hashagg.log";

static INIT: OnceLock<()> = OnceLock::new();

#[derive(Clone, Debug, PartialEq, Eq)]
enum LogTarget {
    File(PathBuf),
    Stderr,
}

impl LogTarget {
    fn from_env() -> Self {
        Self::resolve(env_value(LOG_FILE_ENV), env_value(LOG_DIR_ENV))
    }

    /// An explicit file wins over a directory; neither means stderr.
    fn resolve(file: Option<String>, dir: Option<String>) -> Self {
        match (file, dir) {
            (Some(file), _) => LogTarget::File(PathBuf::from(file)),
            (None, Some(dir)) => LogTarget::File(Path::new(&dir).join(LOG_FILE_NAME)),
            (None, None) => LogTarget::Stderr,
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn level_char(level: &Level) -> char {
    match *level {
        Level::ERROR => 'E',
        Level::WARN => 'W',
        Level::INFO => 'I',
        Level::DEBUG => 'D',
        Level::TRACE => 'T',
    }
}

/// Numeric part of `ThreadId(N)`; 0 if the debug form ever changes.
fn thread_number() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse()
        .unwrap_or(0)
}

fn record_prefix(
    now: &DateTime<Local>,
    thread: u64,
    level: &Level,
    file: Option<&str>,
    line: Option<u32>,
) -> String {
    format!(
        "{}{} {} {}:{}] ",
        level_char(level),
        now.format("%Y%m%d %H:%M:%S%.6f"),
        thread,
        file.unwrap_or("unknown"),
        line.unwrap_or(0)
    )
}

struct GlogLine;

impl<S, N> FormatEvent<S, N> for GlogLine
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let prefix = record_prefix(
            &Local::now(),
            thread_number(),
            metadata.level(),
            metadata.file(),
            metadata.line(),
        );
        write!(writer, "{}", prefix)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber once. `filter` is an `EnvFilter` directive
/// string such as `info` or `novarocks_hashagg=debug`.
pub fn init_with_level(filter: &str) {
    INIT.get_or_init(|| {
        let builder = tracing_fmt()
            .with_env_filter(EnvFilter::new(filter));
        let file = match LogTarget::from_env() {
            LogTarget::File(path) => match open_append(&path) {
                Ok(file) => Some(file),
                Err(err) => {
                    eprintln!(
                        "cannot open log file {}: {}, logging to stderr",
                        path.display(),
                        err
                    );
                    None
                }
            },
            LogTarget::Stderr => None,
        };
        let _ = match file {
            Some(file) => builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .event_format(GlogLine)
                .try_init(),
            None => builder
                .with_writer(std::io::stderr)
                .with_ansi(atty::is(atty::Stream::Stderr))
                .event_format(GlogLine)
                .try_init(),
        };
    });
}

/// Initialize from the loaded config when present, `info` otherwise.
pub fn init() {
    let filter = crate::hashagg_config::config()
        .map(|c| c.effective_log_filter().to_string())
        .unwrap_or_else(|_| "info".to_string());
    init_with_level(&filter);
}

pub use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_file_wins_over_log_dir() {
        assert_eq!(
            LogTarget::resolve(Some("/tmp/a.log".into()), Some("/var/log".into())),
            LogTarget::File(PathBuf::from("/tmp/a.log"))
        );
        assert_eq!(
            LogTarget::resolve(None, Some("/var/log".into())),
            LogTarget::File(PathBuf::from("/var/log").join(LOG_FILE_NAME))
        );
        assert_eq!(LogTarget::resolve(None, None), LogTarget::Stderr);
    }

    #[test]
    fn prefix_follows_glog_layout() {
        let now = Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("unambiguous local time");
        assert_eq!(
            record_prefix(&now, 12, &Level::WARN, Some("src/lib.rs"), Some(40)),
            "W20260304 05:06:07.000000 12 src/lib.rs:40] "
        );
        assert_eq!(
            record_prefix(&now, 0, &Level::DEBUG, None, None),
            "D20260304 05:06:07.000000 0 unknown:0] "
        );
    }
}
