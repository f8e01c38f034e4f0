//! Append-only file persistence: write mutating commands as they execute,
//! replay them on startup with writes suppressed.
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::resp::{try_parse, ParseOutcome, RespValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    No,
    EverySec,
}

impl SyncPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "no" => Some(SyncPolicy::No),
            "everysec" => Some(SyncPolicy::EverySec),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncPolicy::No => "no",
            SyncPolicy::EverySec => "everysec",
        }
    }
}

/// Process-wide AOF state. `writer` is `None` whenever AOF is disabled,
/// whether because the operator asked for that or because opening the file
/// failed at startup (a warning, not a fatal error).
pub struct AofState {
    pub enabled: bool,
    pub path: PathBuf,
    pub sync_policy: SyncPolicy,
    pub last_fsync_ms: i64,
    writer: Option<File>,
}

impl AofState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("redis.aof"),
            sync_policy: SyncPolicy::EverySec,
            last_fsync_ms: 0,
            writer: None,
        }
    }

    /// Attempt to open `path` append-only and enable AOF. Failure to open is
    /// never fatal: it logs a warning and leaves AOF disabled.
    pub fn open(path: PathBuf, sync_policy: SyncPolicy) -> Self {
        let mut state = Self { enabled: false, path: path.clone(), sync_policy, last_fsync_ms: 0, writer: None };
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                state.writer = Some(file);
                state.enabled = true;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to open AOF file, persistence disabled");
            }
        }
        state
    }

    /// Enable AOF at runtime (the `AOF ENABLE` command), opening the file if
    /// it is not already open.
    pub fn enable(&mut self) -> crate::Result<()> {
        if self.writer.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.writer = Some(file);
        }
        self.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Append a mutating command's original frame bytes and, if the sync
    /// policy calls for it, fsync. A write failure here is fatal: the
    /// caller propagates it out of the event loop.
    pub fn append(&mut self, frame_bytes: &[u8], now_ms: i64) -> crate::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let file = self.writer.as_mut().expect("enabled implies writer present");
        file.write_all(frame_bytes)?;
        if self.sync_policy == SyncPolicy::EverySec && now_ms - self.last_fsync_ms >= 1000 {
            file.sync_data()?;
            self.last_fsync_ms = now_ms;
        }
        Ok(())
    }
}

/// Read `path` (if it exists) as a concatenation of RESP arrays and hand
/// each one to `dispatch`. Replay aborts on the first protocol error found
/// mid-stream; a clean EOF ends replay normally.
pub fn replay(path: &Path, mut dispatch: impl FnMut(RespValue) -> crate::Result<()>) -> crate::Result<()> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut offset = 0usize;
    while offset < buf.len() {
        match try_parse(&buf[offset..]) {
            ParseOutcome::Complete { consumed, value } => {
                offset += consumed;
                dispatch(value)?;
            }
            ParseOutcome::Incomplete => {
                return Err(crate::Error::Protocol("AOF file ends mid-frame".into()));
            }
            ParseOutcome::ProtocolError(msg) => {
                return Err(crate::Error::Protocol(format!("corrupt AOF entry: {msg}")));
            }
        }
    }
    Ok(())
}
