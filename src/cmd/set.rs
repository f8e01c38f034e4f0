//! Implement the `SET` command.
use bytes::Bytes;
use tracing::debug;

use super::{as_str, Command};
use crate::db::{Expiry, Store};
use crate::resp::RespValue;
use crate::Error;

/// Set `key` to hold `value`, with an optional `EX seconds` / `PX
/// milliseconds` expiry option. Any TTL from a previous value at the same
/// key is discarded, whether or not this SET specifies a new one.
#[derive(Debug)]
pub struct SetCmd {
    key: Bytes,
    value: Bytes,
    expiry: Expiry,
}

impl Command for SetCmd {
    /// `SET key value [EX seconds | PX milliseconds]`
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        if args.len() < 2 {
            return Err(Error::WrongArity("SET".into()));
        }
        let key = args[0].clone();
        let value = args[1].clone();
        let options = &args[2..];
        if options.len() % 2 != 0 {
            return Err(Error::SyntaxError);
        }

        let mut expiry = Expiry::None;
        for pair in options.chunks_exact(2) {
            let opt = as_str(&pair[0])?.to_ascii_uppercase();
            let value_str = as_str(&pair[1])?;
            let parsed: i64 = value_str.parse().map_err(|_| Error::NotAnInteger)?;
            expiry = match opt.as_str() {
                "EX" => Expiry::ExSeconds(parsed),
                "PX" => Expiry::PxMillis(parsed),
                other => return Err(Error::UnknownOption(other.to_string())),
            };
        }

        Ok(Self { key, value, expiry })
    }

    fn apply(&self, store: &mut Store, now_ms: i64) -> crate::Result<RespValue> {
        store.set(self.key.clone(), self.value.clone(), self.expiry, now_ms)?;
        debug!(key = ?self.key, "SET");
        Ok(RespValue::ok())
    }
}
