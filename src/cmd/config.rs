//! Implementation of `CONFIG SET` and `CONFIG GET`.
use bytes::Bytes;

use super::{as_str, Command};
use crate::db::Store;
use crate::resp::RespValue;
use crate::Error;

#[derive(Debug)]
pub enum ConfigCmd {
    Get { param: String },
    Set { param: String, value: String },
}

impl Command for ConfigCmd {
    /// `CONFIG GET param` or `CONFIG SET param value`.
    fn parse(args: &[Bytes]) -> crate::Result<Self> {
        let Some((subcommand, rest)) = args.split_first() else {
            return Err(Error::WrongArity("CONFIG".into()));
        };
        match as_str(subcommand)?.to_ascii_uppercase().as_str() {
            "GET" => match rest {
                [param] => Ok(ConfigCmd::Get { param: as_str(param)?.to_string() }),
                _ => Err(Error::WrongArity("CONFIG".into())),
            },
            "SET" => match rest {
                [param, value] => Ok(ConfigCmd::Set {
                    param: as_str(param)?.to_string(),
                    value: as_str(value)?.to_string(),
                }),
                _ => Err(Error::WrongArity("CONFIG".into())),
            },
            other => Err(Error::UnknownSubcommand(other.to_string())),
        }
    }

    fn apply(&self, store: &mut Store, _now_ms: i64) -> crate::Result<RespValue> {
        match self {
            ConfigCmd::Get { param } => {
                let value = store
                    .config_get(param)
                    .ok_or_else(|| Error::UnknownConfigParam(param.clone()))?;
                Ok(RespValue::Array(Some(vec![
                    RespValue::bulk(param.clone().into_bytes()),
                    RespValue::bulk(value.into_bytes()),
                ])))
            }
            ConfigCmd::Set { param, value } => {
                store.config_set(param, value)?;
                Ok(RespValue::ok())
            }
        }
    }
}
