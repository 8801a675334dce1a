// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only run-file writer.
//!
//! A run file is a packed sequence of module spills between a HEAD buffer
//! written at open and two EOF buffers written at close. The writer enforces
//! the 2 GiB cap: a write that would leave no room for the EOF provision
//! first closes the current sub-file with continuation and reopens the next
//! one, so no spill ever straddles a file boundary.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::broadcast::BroadcastClient;

/// Hard cap on a single run file.
pub const MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Bytes reserved for the two EOF buffers written at close.
pub const EOF_RESERVE_BYTES: u64 = 2 * (EOF_BUFFER_WORDS as u64) * 4;

const EOF_BUFFER_WORDS: usize = 8194;
const EOF_PAYLOAD_WORDS: u32 = 8192;
const EOF_MAGIC: u32 = u32::from_le_bytes(*b"EOF ");
const HEAD_MAGIC: u32 = u32::from_le_bytes(*b"HEAD");
const HEAD_BUFFER_WORDS: usize = 32;
const HEAD_TITLE_BYTES: usize = 80;

/// On-disk format of the run files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Ldf,
    Pld,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Ldf => "ldf",
            FileFormat::Pld => "pld",
        }
    }

    fn tag(&self) -> u32 {
        match self {
            FileFormat::Ldf => u32::from_le_bytes(*b"LDF "),
            FileFormat::Pld => u32::from_le_bytes(*b"PLD "),
        }
    }
}

fn file_name(dir: &str, prefix: &str, run: u32, sub_file: u32, format: FileFormat) -> PathBuf {
    let name = if sub_file == 0 {
        format!("{}_{}.{}", prefix, run, format.extension())
    } else {
        format!("{}_{}_{}.{}", prefix, run, sub_file, format.extension())
    };
    Path::new(dir).join(name)
}

/// Advance `run` past any run number whose first sub-file already exists and
/// return the resulting path.
pub fn get_next_file_name(run: &mut u32, prefix: &str, dir: &str, format: FileFormat) -> PathBuf {
    let mut path = file_name(dir, prefix, *run, 0, format);
    while path.exists() {
        *run += 1;
        path = file_name(dir, prefix, *run, 0, format);
    }
    path
}

#[derive(Debug)]
pub struct OutputFile {
    format: FileFormat,
    max_size: u64,
    debug_mode: bool,

    file: Option<fs::File>,
    open: bool,
    path: PathBuf,
    bytes_written: u64,
    total_spills: u32,

    run_number: u32,
    sub_file: u32,
    title: String,
    prefix: String,
    dir: String,
}

impl OutputFile {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            max_size: MAX_FILE_SIZE_BYTES,
            debug_mode: false,
            file: None,
            open: false,
            path: PathBuf::new(),
            bytes_written: 0,
            total_spills: 0,
            run_number: 0,
            sub_file: 0,
            title: String::new(),
            prefix: String::new(),
            dir: String::new(),
        }
    }

    /// Lower the rollover cap. Everything below the EOF provision plus one
    /// HEAD buffer is unusable and clamped up.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        let floor = EOF_RESERVE_BYTES + (HEAD_BUFFER_WORDS as u64) * 4 + 4;
        self.max_size = bytes.max(floor);
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn sub_file(&self) -> u32 {
        self.sub_file
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn set_format(&mut self, format: FileFormat) {
        self.format = format;
    }

    /// Toggle synthetic writes. With no argument semantics at the command
    /// layer this simply sets the flag; size accounting continues, no bytes
    /// touch the disk.
    pub fn set_debug_mode(&mut self, on: bool) {
        self.debug_mode = on;
    }

    /// Open the first sub-file of a run, or the next sub-file when
    /// `continue_run` is set. On a fresh run, `run` is advanced past
    /// on-disk collisions and left at the number actually used.
    pub fn open_new_file(
        &mut self,
        title: &str,
        run: &mut u32,
        prefix: &str,
        dir: &str,
        continue_run: bool,
    ) -> io::Result<PathBuf> {
        if self.open {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "output file already open",
            ));
        }
        if continue_run {
            self.sub_file += 1;
        } else {
            get_next_file_name(run, prefix, dir, self.format);
            self.sub_file = 0;
            self.run_number = *run;
            self.total_spills = 0;
        }
        self.title = title.to_string();
        self.prefix = prefix.to_string();
        self.dir = dir.to_string();
        self.open_current()?;
        Ok(self.path.clone())
    }

    fn open_current(&mut self) -> io::Result<()> {
        self.path = file_name(
            &self.dir,
            &self.prefix,
            self.run_number,
            self.sub_file,
            self.format,
        );
        self.bytes_written = 0;
        if !self.debug_mode {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)?;
            file.write_all(&words_to_bytes(&self.head_buffer()))?;
            self.file = Some(file);
        }
        self.bytes_written = (HEAD_BUFFER_WORDS as u64) * 4;
        self.open = true;
        Ok(())
    }

    fn head_buffer(&self) -> Vec<u32> {
        let mut buffer = vec![0u32; HEAD_BUFFER_WORDS];
        buffer[0] = HEAD_MAGIC;
        buffer[1] = HEAD_BUFFER_WORDS as u32;
        buffer[2] = self.run_number;
        buffer[3] = self.sub_file;
        buffer[4] = self.format.tag();
        let title = self.title.as_bytes();
        let take = title.len().min(HEAD_TITLE_BYTES);
        for (i, chunk) in title[..take].chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            buffer[5 + i] = u32::from_le_bytes(word);
        }
        buffer
    }

    fn eof_buffer() -> Vec<u32> {
        let mut buffer = vec![0xFFFF_FFFFu32; EOF_BUFFER_WORDS];
        buffer[0] = EOF_MAGIC;
        buffer[1] = EOF_PAYLOAD_WORDS;
        buffer
    }

    /// Append one spill. Rolls to the next sub-file first when this write
    /// would eat into the EOF provision.
    pub fn write_words(&mut self, words: &[u32]) -> io::Result<u64> {
        if !self.open {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no open output file",
            ));
        }
        let bytes = (words.len() as u64) * 4;
        if self.bytes_written + bytes + EOF_RESERVE_BYTES > self.max_size {
            self.close(true)?;
            self.sub_file += 1;
            self.open_current()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&words_to_bytes(words))?;
        }
        self.bytes_written += bytes;
        self.total_spills += 1;
        Ok(bytes)
    }

    /// Close the file, appending the two EOF buffers. The open flag drops
    /// even when the final writes fail.
    pub fn close(&mut self, _continue_run: bool) -> io::Result<u64> {
        if !self.open {
            return Ok(self.bytes_written);
        }
        self.open = false;
        let file = self.file.take();
        self.bytes_written += EOF_RESERVE_BYTES;
        if let Some(mut file) = file {
            let eof = words_to_bytes(&Self::eof_buffer());
            file.write_all(&eof)?;
            file.write_all(&eof)?;
            file.flush()?;
        }
        Ok(self.bytes_written)
    }

    /// Emit the per-spill notification datagram: run metadata, current size
    /// and file name.
    pub fn send_packet(&self, client: &BroadcastClient) -> io::Result<()> {
        let name = self.path.to_string_lossy();
        let name = name.as_bytes();
        let payload_len = 4 + 4 + 4 + 8 + 2 + name.len();
        let mut datagram = Vec::with_capacity(4 + payload_len);
        datagram.extend_from_slice(&(payload_len as u32).to_le_bytes());
        datagram.extend_from_slice(&self.run_number.to_le_bytes());
        datagram.extend_from_slice(&self.sub_file.to_le_bytes());
        datagram.extend_from_slice(&self.total_spills.to_le_bytes());
        datagram.extend_from_slice(&self.bytes_written.to_le_bytes());
        datagram.extend_from_slice(&(name.len() as u16).to_le_bytes());
        datagram.extend_from_slice(name);
        client.send_raw(&datagram)?;
        Ok(())
    }
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_string(dir: &TempDir) -> String {
        format!("{}/", dir.path().display())
    }

    #[test]
    fn open_write_close_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let dir = dir_string(&tmp);
        let mut output = OutputFile::new(FileFormat::Ldf);
        assert!(!output.is_open());

        let mut run = 1;
        let path = output
            .open_new_file("a title", &mut run, "test", &dir, false)
            .unwrap();
        assert!(output.is_open());
        assert_eq!(run, 1);
        assert!(path.ends_with("test_1.ldf"));

        output.write_words(&[1, 2, 3, 4]).unwrap();
        let size = output.close(false).unwrap();
        assert!(!output.is_open());

        let on_disk = fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk, size);
        assert_eq!(
            on_disk,
            (HEAD_BUFFER_WORDS as u64) * 4 + 16 + EOF_RESERVE_BYTES
        );
    }

    #[test]
    fn run_number_advances_past_collisions() {
        let tmp = TempDir::new().unwrap();
        let dir = dir_string(&tmp);
        fs::write(tmp.path().join("test_1.ldf"), b"x").unwrap();
        fs::write(tmp.path().join("test_2.ldf"), b"x").unwrap();

        let mut run = 1;
        let path = get_next_file_name(&mut run, "test", &dir, FileFormat::Ldf);
        assert_eq!(run, 3);
        assert!(path.ends_with("test_3.ldf"));
    }

    #[test]
    fn double_open_is_refused() {
        let tmp = TempDir::new().unwrap();
        let dir = dir_string(&tmp);
        let mut output = OutputFile::new(FileFormat::Ldf);
        let mut run = 1;
        output
            .open_new_file("", &mut run, "test", &dir, false)
            .unwrap();
        assert!(output
            .open_new_file("", &mut run, "test", &dir, false)
            .is_err());
    }

    #[test]
    fn write_without_open_file_fails() {
        let mut output = OutputFile::new(FileFormat::Ldf);
        let err = output.write_words(&[1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn rollover_keeps_spills_whole() {
        let tmp = TempDir::new().unwrap();
        let dir = dir_string(&tmp);
        // Room for the HEAD buffer, the EOF provision and ~2 spills.
        let cap = EOF_RESERVE_BYTES + (HEAD_BUFFER_WORDS as u64) * 4 + 2048;
        let mut output = OutputFile::new(FileFormat::Ldf).with_max_size(cap);

        let mut run = 7;
        output
            .open_new_file("", &mut run, "roll", &dir, false)
            .unwrap();

        let spill: Vec<u32> = (0..200).collect(); // 800 bytes
        for _ in 0..4 {
            output.write_words(&spill).unwrap();
            assert!(output.size() + EOF_RESERVE_BYTES <= cap);
        }
        output.close(false).unwrap();

        assert!(tmp.path().join("roll_7.ldf").exists());
        assert!(tmp.path().join("roll_7_1.ldf").exists());

        // Every sub-file honors the cap and whole spills never straddle.
        for name in ["roll_7.ldf", "roll_7_1.ldf"] {
            let len = fs::metadata(tmp.path().join(name)).unwrap().len();
            assert!(len <= cap);
            let body = len - (HEAD_BUFFER_WORDS as u64) * 4 - EOF_RESERVE_BYTES;
            assert_eq!(body % 800, 0);
        }
    }

    #[test]
    fn debug_mode_touches_no_disk() {
        let tmp = TempDir::new().unwrap();
        let dir = dir_string(&tmp);
        let mut output = OutputFile::new(FileFormat::Ldf);
        output.set_debug_mode(true);

        let mut run = 1;
        let path = output
            .open_new_file("", &mut run, "ghost", &dir, false)
            .unwrap();
        output.write_words(&[0; 64]).unwrap();
        output.close(false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn head_buffer_carries_title() {
        let mut output = OutputFile::new(FileFormat::Ldf);
        output.title = "abcd".into();
        output.run_number = 9;
        let head = output.head_buffer();
        assert_eq!(head[0], HEAD_MAGIC);
        assert_eq!(head[2], 9);
        assert_eq!(head[5], u32::from_le_bytes(*b"abcd"));
    }
}
