//! Implementation of the `PING` command.
use bytes::Bytes;

use super::Command;
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

/// Pings the server, which responds with either `PONG` or a provided
/// custom message.
#[derive(Debug)]
pub struct PingCmd {
    msg: Option<Bytes>,
}

impl Command for PingCmd {
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        match args {
            [] => Ok(Self { msg: None }),
            [msg] => Ok(Self { msg: Some(msg.clone()) }),
            _ => Err(Error::WrongArity("PING".into())),
        }
    }

    fn apply(&self, _store: &mut Store, _now_ms: i64) -> crate::Result<RespValue> {
        Ok(match &self.msg {
            None => RespValue::SimpleString("PONG".into()),
            Some(msg) => RespValue::BulkString(Some(msg.clone())),
        })
    }
}
