//! The append-only, generation-rolled line writer.
//!
//! `NAME.0` is the live file. At local midnight (or when asked explicitly)
//! the cascade rotates: `NAME.{n-2}` renames to `NAME.{n-1}` and so on
//! down to a fresh `NAME.0`, keeping `generations` files. Writes buffer
//! and flush every [`BUFFERED_WRITES_BEFORE_FLUSH`] lines so a crash loses
//! a bounded amount of log.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Lines buffered before an explicit flush.
pub const BUFFERED_WRITES_BEFORE_FLUSH: usize = 20;

/// One rolled log file family.
#[derive(Debug)]
pub struct LogWriter {
    dir: PathBuf,
    base: String,
    generations: usize,
    file: BufWriter<File>,
    day: NaiveDate,
    unflushed: usize,
}

impl LogWriter {
    /// Opens (appending) the live generation of `base` under `dir`.
    pub fn open(dir: &Path, base: &str, generations: usize) -> io::Result<Self> {
        let file = Self::open_live(dir, base)?;
        Ok(Self {
            dir: dir.to_owned(),
            base: base.to_owned(),
            generations: generations.max(2),
            file,
            day: today(),
            unflushed: 0,
        })
    }

    fn open_live(dir: &Path, base: &str) -> io::Result<BufWriter<File>> {
        let path = dir.join(format!("{base}.0"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    /// Path of generation `n`.
    #[must_use]
    pub fn generation_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.{n}", self.base))
    }

    /// Appends one line, rolling first when the day changed.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let now = today();
        if now != self.day {
            self.roll()?;
            self.day = now;
        }
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.unflushed += 1;
        if self.unflushed >= BUFFERED_WRITES_BEFORE_FLUSH {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes buffered lines to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.unflushed = 0;
        self.file.flush()
    }

    /// Rotates the generation cascade and reopens a fresh live file.
    pub fn roll(&mut self) -> io::Result<()> {
        self.flush()?;
        for n in (0..self.generations - 1).rev() {
            let from = self.generation_path(n);
            if from.exists() {
                std::fs::rename(&from, self.generation_path(n + 1))?;
            }
        }
        self.file = Self::open_live(&self.dir, &self.base)?;
        Ok(())
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn writes_append_to_generation_zero() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = LogWriter::open(tmp.path(), "OUTPUT_LOG", 4).expect("opens");
        log.write_line("one").expect("writes");
        log.write_line("two").expect("writes");
        log.flush().expect("flushes");
        assert_eq!(read(&log.generation_path(0)), "one\ntwo\n");
    }

    #[test]
    fn flush_happens_after_bounded_writes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = LogWriter::open(tmp.path(), "OUTPUT_LOG", 4).expect("opens");
        for i in 0..BUFFERED_WRITES_BEFORE_FLUSH {
            log.write_line(&format!("line {i}")).expect("writes");
        }
        // The bounded flush fired without an explicit flush() call.
        let content = read(&log.generation_path(0));
        assert_eq!(content.lines().count(), BUFFERED_WRITES_BEFORE_FLUSH);
    }

    #[test]
    fn roll_cascades_generations() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = LogWriter::open(tmp.path(), "TRANSFER_LOG", 3).expect("opens");
        log.write_line("gen zero").expect("writes");
        log.roll().expect("rolls");
        log.write_line("fresh").expect("writes");
        log.flush().expect("flushes");

        assert_eq!(read(&log.generation_path(1)), "gen zero\n");
        assert_eq!(read(&log.generation_path(0)), "fresh\n");
    }

    #[test]
    fn roll_drops_the_oldest_generation() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = LogWriter::open(tmp.path(), "L", 2).expect("opens");
        log.write_line("a").expect("writes");
        log.roll().expect("rolls");
        log.write_line("b").expect("writes");
        log.roll().expect("rolls");
        // Two generations kept: the old "a" fell off the end.
        assert_eq!(read(&log.generation_path(1)), "b\n");
        assert!(!log.generation_path(2).exists());
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        {
            let mut log = LogWriter::open(tmp.path(), "L", 2).expect("opens");
            log.write_line("first run").expect("writes");
            log.flush().expect("flushes");
        }
        let mut log = LogWriter::open(tmp.path(), "L", 2).expect("opens");
        log.write_line("second run").expect("writes");
        log.flush().expect("flushes");
        assert_eq!(read(&log.generation_path(0)), "first run\nsecond run\n");
    }
}
