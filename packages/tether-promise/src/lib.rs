//! Dependency promises for code that cannot block or await.
//!
//! A [`Promise`] is a value that will be known later, possibly after other
//! promises (its parents) are known. There is no executor thread and no
//! event loop: every transition happens synchronously inside the call that
//! caused it, and completions coming from outside (a webview callback, a
//! timer, an RPC reply) are fed in with [`Promise::fulfill`] and
//! [`Promise::reject`].
//!
//! ```
//! use tether_promise::{PromiseState, Runtime};
//!
//! let rt: Runtime<i32, String> = Runtime::default();
//! let js_result = rt.pending();
//! let doubled = js_result.then(|values| Ok(values[0].unwrap_or(0) * 2));
//! assert_eq!(doubled.state(), PromiseState::Unscheduled);
//!
//! js_result.fulfill(21).unwrap();
//! assert_eq!(doubled.returned_value(), Some(42));
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod promise;
mod queue;
pub mod runtime;
pub mod state;

pub use builder::PromiseBuilder;
pub use config::RuntimeConfig;
pub use error::PromiseError;
pub use promise::{Executor, Handler, Promise, PromiseId, Scheduler};
pub use runtime::{Profiling, Runtime};
pub use state::PromiseState;
