//! Asynchronous rolling-file logger behind the `log` facade.
//!
//! Call sites use `log::{error!, warn!, info!, debug!}`; the installed backend
//! formats each record with a microsecond timestamp and level tag, then either
//! writes it under a mutex (sync mode) or hands it to a bounded blocking deque
//! drained by a dedicated writer thread (async mode, queue capacity > 0).
//!
//! Files roll on calendar-day change and every `max_lines` lines:
//! `<dir>/YYYY_MM_DD<suffix>`, then `<dir>/YYYY_MM_DD-<N><suffix>` for the
//! N-th overflow of that day.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{Level, LevelFilter, Metadata, Record};
use time::OffsetDateTime;

use crate::blockdeque::BlockDeque;

pub const DEFAULT_MAX_LINES: usize = 50_000;

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub suffix: String,
    pub level: LevelFilter,
    /// 0 selects synchronous mode.
    pub queue_capacity: usize,
    pub max_lines: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./log"),
            suffix: ".log".to_string(),
            level: LevelFilter::Info,
            queue_capacity: 1024,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Rolling file sink. Not synchronized; callers serialize access.
struct Sink {
    dir: PathBuf,
    suffix: String,
    max_lines: usize,
    file: Option<File>,
    day: Option<time::Date>,
    line_count: usize,
}

impl Sink {
    fn new(dir: PathBuf, suffix: String, max_lines: usize) -> Self {
        Self {
            dir,
            suffix,
            max_lines,
            file: None,
            day: None,
            line_count: 0,
        }
    }

    fn file_name(dir: &Path, day: time::Date, seq: usize, suffix: &str) -> PathBuf {
        let base = if seq == 0 {
            format!(
                "{:04}_{:02}_{:02}{}",
                day.year(),
                day.month() as u8,
                day.day(),
                suffix
            )
        } else {
            format!(
                "{:04}_{:02}_{:02}-{}{}",
                day.year(),
                day.month() as u8,
                day.day(),
                seq,
                suffix
            )
        };
        dir.join(base)
    }

    fn roll_if_needed(&mut self) -> std::io::Result<()> {
        let today = OffsetDateTime::now_utc().date();
        let day_changed = self.day != Some(today);
        let line_overflow =
            self.line_count > 0 && self.max_lines > 0 && self.line_count % self.max_lines == 0;

        if self.file.is_some() && !day_changed && !line_overflow {
            return Ok(());
        }

        if day_changed {
            self.day = Some(today);
            self.line_count = 0;
        }
        let seq = if self.max_lines > 0 {
            self.line_count / self.max_lines
        } else {
            0
        };
        fs::create_dir_all(&self.dir)?;
        let path = Self::file_name(&self.dir, today, seq, &self.suffix);
        self.file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        Ok(())
    }

    fn write_line(&mut self, line: &str) {
        if self.roll_if_needed().is_err() {
            return;
        }
        if let Some(file) = self.file.as_mut() {
            if file.write_all(line.as_bytes()).is_ok() {
                self.line_count += 1;
            }
        }
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

enum Mode {
    Sync(Mutex<Sink>),
    Async(Arc<BlockDeque<String>>),
}

struct AsyncLogger {
    level: LevelFilter,
    mode: Mode,
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "[ERROR]",
        Level::Warn => "[WARN] ",
        Level::Info => "[INFO] ",
        Level::Debug | Level::Trace => "[DEBUG]",
    }
}

fn format_line(level: Level, args: &std::fmt::Arguments<'_>) -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06} {} {}\n",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.microsecond(),
        level_tag(level),
        args
    )
}

impl log::Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.args());
        match &self.mode {
            Mode::Sync(sink) => {
                let mut sink = sink.lock().unwrap();
                sink.write_line(&line);
                sink.flush();
            }
            Mode::Async(deque) => {
                deque.push_back(line);
            }
        }
    }

    fn flush(&self) {
        match &self.mode {
            Mode::Sync(sink) => sink.lock().unwrap().flush(),
            Mode::Async(deque) => deque.flush(),
        }
    }
}

/// Keeps the writer thread alive; dropping it drains the queue and joins.
pub struct LoggerGuard {
    deque: Option<Arc<BlockDeque<String>>>,
    writer: Option<JoinHandle<()>>,
}

impl LoggerGuard {
    pub fn close(&mut self) {
        if let Some(deque) = self.deque.take() {
            deque.close();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Installs the process-wide logger. Fails if a logger is already set.
pub fn init(settings: LogSettings) -> std::io::Result<LoggerGuard> {
    fs::create_dir_all(&settings.dir)?;
    let sink = Sink::new(settings.dir, settings.suffix, settings.max_lines);

    let (mode, guard) = if settings.queue_capacity > 0 {
        let deque = Arc::new(BlockDeque::<String>::new(settings.queue_capacity));
        let consumer = Arc::clone(&deque);
        let mut sink = sink;
        let writer = thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Some(line) = consumer.pop(None) {
                    sink.write_line(&line);
                    if consumer.is_empty() {
                        sink.flush();
                    }
                }
                sink.flush();
            })?;
        (
            Mode::Async(Arc::clone(&deque)),
            LoggerGuard {
                deque: Some(deque),
                writer: Some(writer),
            },
        )
    } else {
        (
            Mode::Sync(Mutex::new(sink)),
            LoggerGuard {
                deque: None,
                writer: None,
            },
        )
    };

    let logger = Box::leak(Box::new(AsyncLogger {
        level: settings.level,
        mode,
    }));
    log::set_logger(logger)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(settings.level);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_patterns() {
        let day = time::Date::from_calendar_date(2026, time::Month::August, 1).unwrap();
        let dir = Path::new("/tmp/log");
        assert_eq!(
            Sink::file_name(dir, day, 0, ".log"),
            Path::new("/tmp/log/2026_08_01.log")
        );
        assert_eq!(
            Sink::file_name(dir, day, 3, ".log"),
            Path::new("/tmp/log/2026_08_01-3.log")
        );
    }

    #[test]
    fn sink_rolls_on_line_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Sink::new(dir.path().to_path_buf(), ".log".to_string(), 10);
        for i in 0..25 {
            sink.write_line(&format!("line {i}\n"));
        }
        sink.flush();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3, "expected primary plus two overflow files");
        assert!(names[0].ends_with(".log") && !names[0].contains('-'));
        assert!(names[1].contains("-1"));
        assert!(names[2].contains("-2"));
    }

    #[test]
    fn formatted_line_carries_tag_and_newline() {
        let line = format_line(Level::Warn, &format_args!("disk {} full", "A"));
        assert!(line.contains("[WARN]"));
        assert!(line.ends_with("disk A full\n"));
    }

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("ERROR"), LevelFilter::Error);
        assert_eq!(parse_level("bogus"), LevelFilter::Info);
    }
}
