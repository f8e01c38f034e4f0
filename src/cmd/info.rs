//! Implementation of the `INFO` command.
use bytes::Bytes;

use super::Command;
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

#[derive(Debug)]
pub struct InfoCmd;

impl Command for InfoCmd {
    /// `INFO` takes no arguments; extra args are a hard error rather than
    /// silently ignored (resolved open question: strict arity-1).
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        if !args.is_empty() {
            return Err(Error::WrongArity("INFO".into()));
        }
        Ok(Self)
    }

    fn apply(&self, store: &mut Store, _now_ms: i64) -> crate::Result<RespValue> {
        let body = format!(
            "used_memory:{}\r\nmaxmemory:{}\r\nevicted_keys:{}\r\naof_enabled:{}\r\n",
            store.memory.estimated_bytes,
            store.memory.limit_bytes,
            store.memory.evictions_total,
            if store.aof.enabled { 1 } else { 0 },
        );
        Ok(RespValue::bulk(body.into_bytes()))
    }
}
