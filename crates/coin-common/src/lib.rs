//! Common infrastructure for the COIN controller.
//!
//! - [`shell`]: shell command execution with proper quoting
//! - [`store`]: the shared key-value state store and its key layout
//! - [`error`]: error types shared by both
//!
//! # Example
//!
//! ```ignore
//! use coin_common::shell::{self, IP_CMD, shellquote};
//!
//! async fn link_up(name: &str) -> coin_common::CoinCommonResult<()> {
//!     let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(name));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;
pub mod store;

pub use error::{CoinCommonError, CoinCommonResult};
pub use store::{MemoryStore, RedisStore, StateStore};
