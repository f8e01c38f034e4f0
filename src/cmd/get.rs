//! Implementation of the `GET` command.
use bytes::Bytes;
use tracing::debug;

use super::Command;
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

/// Get the value for a key, or a null bulk string if it doesn't exist or
/// has expired.
#[derive(Debug)]
pub struct GetCmd {
    key: Bytes,
}

impl Command for GetCmd {
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        match args {
            [key] => Ok(Self { key: key.clone() }),
            _ => Err(Error::WrongArity("GET".into())),
        }
    }

    fn apply(&self, store: &mut Store, now_ms: i64) -> crate::Result<RespValue> {
        let response = match store.get(&self.key, now_ms) {
            Some(value) => RespValue::BulkString(Some(value)),
            None => RespValue::null_bulk(),
        };
        debug!(?response, "GET");
        Ok(response)
    }
}
