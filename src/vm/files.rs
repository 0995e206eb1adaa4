// BASIC file handles for OpenFile / ReadLine / WriteLine / CloseFile / EOF

use crate::error::{CyberError, CyberResult};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};

/// How a handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

impl FileMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FileMode::Read),
            1 => Some(FileMode::Write),
            2 => Some(FileMode::Append),
            _ => None,
        }
    }
}

enum Handle {
    Reader(BufReader<File>),
    Writer(File),
}

/// Open handles, numbered from 1
pub struct FileTable {
    handles: FxHashMap<i64, Handle>,
    next: i64,
}

impl Default for FileTable {
    fn default() -> Self {
        FileTable {
            handles: FxHashMap::default(),
            next: 1,
        }
    }
}

impl FileTable {
    pub fn open(&mut self, path: &str, mode: FileMode) -> CyberResult<i64> {
        let opened = match mode {
            FileMode::Read => File::open(path).map(|f| Handle::Reader(BufReader::new(f))),
            FileMode::Write => File::create(path).map(Handle::Writer),
            FileMode::Append => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Handle::Writer),
        };
        let handle = opened.map_err(|e| CyberError::file_error(format!("OpenFile {}: {}", path, e)))?;
        let id = self.next;
        self.next += 1;
        self.handles.insert(id, handle);
        Ok(id)
    }

    fn unknown(id: i64) -> CyberError {
        CyberError::file_error(format!("invalid file handle: {}", id))
    }

    /// Next line without its terminator; "" at end of file
    pub fn read_line(&mut self, id: i64) -> CyberResult<String> {
        match self.handles.get_mut(&id) {
            Some(Handle::Reader(reader)) => {
                let mut line = String::new();
                reader
                    .read_line(&mut line)
                    .map_err(|e| CyberError::file_error(format!("ReadLine: {}", e)))?;
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Ok(line)
            }
            Some(Handle::Writer(_)) => Err(CyberError::file_error(format!(
                "file handle {} is not open for reading",
                id
            ))),
            None => Err(Self::unknown(id)),
        }
    }

    pub fn write_line(&mut self, id: i64, text: &str) -> CyberResult<()> {
        match self.handles.get_mut(&id) {
            Some(Handle::Writer(file)) => writeln!(file, "{}", text)
                .map_err(|e| CyberError::file_error(format!("WriteLine: {}", e))),
            Some(Handle::Reader(_)) => Err(CyberError::file_error(format!(
                "file handle {} is not open for writing",
                id
            ))),
            None => Err(Self::unknown(id)),
        }
    }

    pub fn close(&mut self, id: i64) -> CyberResult<()> {
        match self.handles.remove(&id) {
            Some(Handle::Writer(mut file)) => file
                .flush()
                .map_err(|e| CyberError::file_error(format!("CloseFile: {}", e))),
            Some(Handle::Reader(_)) => Ok(()),
            None => Err(Self::unknown(id)),
        }
    }

    /// True at end of input, and for handles that cannot be read
    pub fn eof(&mut self, id: i64) -> bool {
        match self.handles.get_mut(&id) {
            Some(Handle::Reader(reader)) => reader.fill_buf().map(|b| b.is_empty()).unwrap_or(true),
            _ => true,
        }
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    /// Close everything (used when a new chunk is loaded)
    pub fn close_all(&mut self) {
        self.handles.clear();
        self.next = 1;
    }
}
