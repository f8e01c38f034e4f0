//! Implementation of the `DEL` command.
use bytes::Bytes;
use tracing::debug;

use super::Command;
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

/// Remove the given keys, returning the count of keys that were present
/// and not already expired.
#[derive(Debug)]
pub struct DelCmd {
    keys: Vec<Bytes>,
}

impl Command for DelCmd {
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        if args.is_empty() {
            return Err(Error::WrongArity("DEL".into()));
        }
        Ok(Self { keys: args.to_vec() })
    }

    fn apply(&self, store: &mut Store, now_ms: i64) -> crate::Result<RespValue> {
        let count = store.del(&self.keys, now_ms);
        debug!(count, "DEL");
        Ok(RespValue::Integer(count))
    }
}
