//! Implementation of the `ECHO` command.
use bytes::Bytes;

use super::Command;
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

/// Returns `message` as a bulk string, unchanged.
#[derive(Debug)]
pub struct EchoCmd {
    message: Bytes,
}

impl Command for EchoCmd {
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        match args {
            [message] => Ok(Self { message: message.clone() }),
            _ => Err(Error::WrongArity("ECHO".into())),
        }
    }

    fn apply(&self, _store: &mut Store, _now_ms: i64) -> crate::Result<RespValue> {
        Ok(RespValue::BulkString(Some(self.message.clone())))
    }
}
