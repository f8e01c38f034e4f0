//! Command dispatcher: validates the RESP input contract, routes to a
//! command handler, and (for mutating commands) appends to the AOF.
use bytes::Bytes;

use crate::db::Store;
use crate::resp::{serialize, RespValue};
use crate::Error;

pub mod aof_toggle;
pub mod config;
pub mod del;
pub mod echo;
pub mod get;
pub mod info;
pub mod ping;
pub mod set;

pub use aof_toggle::AofToggleCmd;
pub use config::ConfigCmd;
pub use del::DelCmd;
pub use echo::EchoCmd;
pub use get::GetCmd;
pub use info::InfoCmd;
pub use ping::PingCmd;
pub use set::SetCmd;

/// Shared shape for a parsed command: build one from its already-validated
/// argument list, then apply it against the store.
pub(crate) trait Command {
    /// `args` is every array element after the command name, already
    /// checked to be non-null bulk strings.
    fn parse(args: &[Bytes]) -> crate::Result<Self>
    where
        Self: Sized;

    fn apply(&self, store: &mut Store, now_ms: i64) -> crate::Result<RespValue>;
}

/// All possible command variants.
#[derive(Debug)]
pub enum CommandVariant {
    Ping(PingCmd),
    Echo(EchoCmd),
    Set(SetCmd),
    Get(GetCmd),
    Del(DelCmd),
    Config(ConfigCmd),
    AofToggle(AofToggleCmd),
    Info(InfoCmd),
}

impl CommandVariant {
    fn from_name_and_args(name: &str, args: &[Bytes]) -> crate::Result<Self> {
        use CommandVariant as C;
        Ok(match name.to_ascii_lowercase().as_str() {
            "ping" => C::Ping(PingCmd::parse(args)?),
            "echo" => C::Echo(EchoCmd::parse(args)?),
            "set" => C::Set(SetCmd::parse(args)?),
            "get" => C::Get(GetCmd::parse(args)?),
            "del" => C::Del(DelCmd::parse(args)?),
            "config" => C::Config(ConfigCmd::parse(args)?),
            "aof" => C::AofToggle(AofToggleCmd::parse(args)?),
            "info" => C::Info(InfoCmd::parse(args)?),
            _ => return Err(Error::UnknownCommand(name.to_string())),
        })
    }

    fn apply(&self, store: &mut Store, now_ms: i64) -> crate::Result<RespValue> {
        use CommandVariant as C;
        match self {
            C::Ping(cmd) => cmd.apply(store, now_ms),
            C::Echo(cmd) => cmd.apply(store, now_ms),
            C::Set(cmd) => cmd.apply(store, now_ms),
            C::Get(cmd) => cmd.apply(store, now_ms),
            C::Del(cmd) => cmd.apply(store, now_ms),
            C::Config(cmd) => cmd.apply(store, now_ms),
            C::AofToggle(cmd) => cmd.apply(store, now_ms),
            C::Info(cmd) => cmd.apply(store, now_ms),
        }
    }

    /// Only SET and DEL are written to the AOF; read-only and
    /// configuration commands are never persisted.
    fn is_mutating(&self) -> bool {
        matches!(self, CommandVariant::Set(_) | CommandVariant::Del(_))
    }
}

/// Validate the command dispatcher's input contract: a non-null array whose
/// elements are all non-null bulk strings.
fn extract_args(value: &RespValue) -> crate::Result<Vec<Bytes>> {
    let RespValue::Array(Some(items)) = value else {
        return Err(Error::Protocol("expected an array of bulk strings".into()));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(Some(bytes)) => out.push(bytes.clone()),
            _ => return Err(Error::Protocol("command array must contain only bulk strings".into())),
        }
    }
    if out.is_empty() {
        return Err(Error::Protocol("empty command array".into()));
    }
    Ok(out)
}

/// Execute one parsed RESP value as a command and produce its response.
///
/// `suppress_aof` is set during startup replay, so replayed commands are
/// not written back to the file they came from. Everything other than an
/// AOF write failure is folded into a RESP Error response rather than
/// propagated: protocol/command errors never close the connection.
pub fn execute(value: RespValue, store: &mut Store, now_ms: i64, suppress_aof: bool) -> crate::Result<RespValue> {
    let fields = match extract_args(&value) {
        Ok(fields) => fields,
        Err(e) => return Ok(RespValue::error(e.to_string())),
    };
    let name = String::from_utf8_lossy(&fields[0]).into_owned();

    let command = match CommandVariant::from_name_and_args(&name, &fields[1..]) {
        Ok(cmd) => cmd,
        Err(e) => return Ok(RespValue::error(e.to_string())),
    };

    let response = match command.apply(store, now_ms) {
        Ok(r) => r,
        Err(e) => return Ok(RespValue::error(e.to_string())),
    };

    if !suppress_aof && command.is_mutating() {
        let bytes = serialize(&value);
        store.aof.append(&bytes, now_ms)?;
    }

    Ok(response)
}

/// Convert a bulk string arg into UTF-8, as required by commands whose
/// arguments must be text (keys, config params, option tokens).
fn as_str(bytes: &Bytes) -> crate::Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::Protocol("expected UTF-8 argument".into()))
}
