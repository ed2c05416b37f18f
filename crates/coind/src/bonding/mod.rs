//! IP uplink bonding mode.
//!
//! Handles `{"type": "coin", "subtype": "ipupbond", ...}` requests:
//!
//! | command            | fields                                  | reply `command`     |
//! |--------------------|-----------------------------------------|---------------------|
//! | `create`           | `ip-address`                            | `created`           |
//! | `delete`           | `bond-interface`                        | `deleted`           |
//! | `enslave`          | `bond-interface`, `interface`           | `enslaved`          |
//! | `liberate`         | `bond-interface`, `interface`           | `liberated`         |
//! | `get-active-slave` | `bond-interface`                        | `got-active-slave`  |
//! | `set-active-slave` | `bond-interface`, `interface` (or null) | `set-active-slave`  |
//!
//! Failures reply `command: "error"` with the reason in `status`, except
//! refusals that change nothing (already enslaved and the like), which keep
//! the verb.

mod driver;
mod types;

pub use driver::BondingDriver;
pub use types::{BondError, BondInterface};

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::context::DriverContext;
use crate::event::EventKind;

pub const SUBTYPE: &str = "ipupbond";

impl BondingDriver {
    /// The driver reads ports from the registry on demand.
    pub const SUBSCRIPTIONS: &'static [EventKind] = &[];

    /// Handles one `ipupbond` request and returns the reply.
    pub async fn handle_command(&mut self, request: &Value, ctx: &mut DriverContext<'_>) -> Value {
        let command = request.get("command").and_then(Value::as_str).unwrap_or("");
        debug!(command, "Bonding command");

        let result = self.dispatch(command, request, ctx).await;
        let mut reply = Map::new();
        reply.insert("type".to_string(), json!("coin"));
        reply.insert("subtype".to_string(), json!(SUBTYPE));
        match result {
            Ok(fields) => reply.extend(fields),
            Err(e) if e.is_noop() => {
                reply.insert("command".to_string(), json!(reply_verb(command)));
                reply.insert("status".to_string(), json!(e.to_string()));
            }
            Err(e) => {
                reply.insert("command".to_string(), json!("error"));
                reply.insert("status".to_string(), json!(e.to_string()));
            }
        }
        Value::Object(reply)
    }

    async fn dispatch(
        &mut self,
        command: &str,
        request: &Value,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Map<String, Value>, BondError> {
        if command.is_empty() {
            return Err(BondError::MissingField("command"));
        }

        if command == "create" {
            let ip = string_field(request, "ip-address")?;
            let name = self.create(ip, ctx).await?;
            return Ok(fields([("command", json!("created")), ("interface", json!(name))]));
        }

        let bond = string_field(request, "bond-interface")?;
        if self.bond(bond).is_none() {
            return Err(BondError::UnknownBond(bond.to_string()));
        }

        let interface = match command {
            "delete" | "get-active-slave" => None,
            "set-active-slave" if request.get("interface").map_or(true, Value::is_null) => None,
            _ => {
                let interface = string_field(request, "interface")?;
                let known = ctx.intf.interfaces().await?;
                if !known.iter().any(|i| i == interface) {
                    return Err(BondError::UnknownInterface(interface.to_string()));
                }
                Some(interface)
            }
        };

        let status = match (command, interface) {
            ("delete", _) => {
                self.delete(bond, ctx).await?;
                json!(0)
            }
            ("get-active-slave", _) => json!(self.active_slave(bond)?),
            ("enslave", Some(interface)) => {
                self.enslave(bond, interface, ctx)?;
                json!(0)
            }
            ("liberate", Some(interface)) => {
                self.liberate(bond, interface, ctx)?;
                json!(0)
            }
            ("set-active-slave", interface) => {
                if let Some(interface) = interface {
                    if self.active_slave(bond)? == Some(interface) {
                        return Err(BondError::AlreadyActive);
                    }
                }
                self.set_active_slave(bond, interface, ctx)?;
                json!(0)
            }
            (other, _) => return Err(BondError::UnknownCommand(other.to_string())),
        };

        Ok(fields([
            ("command", json!(reply_verb(command))),
            ("status", status),
        ]))
    }
}

fn reply_verb(command: &str) -> &str {
    match command {
        "create" => "created",
        "delete" => "deleted",
        "enslave" => "enslaved",
        "liberate" => "liberated",
        "get-active-slave" => "got-active-slave",
        "set-active-slave" => "set-active-slave",
        _ => "error",
    }
}

fn string_field<'a>(request: &'a Value, name: &'static str) -> Result<&'a str, BondError> {
    request
        .get(name)
        .and_then(Value::as_str)
        .ok_or(BondError::MissingField(name))
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
