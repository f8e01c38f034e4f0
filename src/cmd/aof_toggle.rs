//! Implementation of `AOF ENABLE` and `AOF DISABLE`.
use bytes::Bytes;
use tracing::info;

use super::{as_str, Command};
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

#[derive(Debug)]
pub enum AofToggleCmd {
    Enable,
    Disable,
}

impl Command for AofToggleCmd {
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        match args {
            [sub] => match as_str(sub)?.to_ascii_uppercase().as_str() {
                "ENABLE" => Ok(AofToggleCmd::Enable),
                "DISABLE" => Ok(AofToggleCmd::Disable),
                other => Err(Error::UnknownSubcommand(other.to_string())),
            },
            _ => Err(Error::WrongArity("AOF".into())),
        }
    }

    fn apply(&self, store: &mut Store, _now_ms: i64) -> crate::Result<RespValue> {
        match self {
            AofToggleCmd::Enable => {
                store.aof.enable()?;
                info!("AOF enabled");
            }
            AofToggleCmd::Disable => {
                store.aof.disable();
                info!("AOF disabled");
            }
        }
        Ok(RespValue::ok())
    }
}
