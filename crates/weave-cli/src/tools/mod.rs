//! Built-in tools available to replays

mod list;
mod read;

use std::sync::Arc;

use weave_agent::{Toolkit, Typed};

pub use list::ListTool;
pub use read::ReadTool;

/// Control tools plus the built-in file tools
pub fn default_toolkit() -> weave_agent::Result<Toolkit> {
    let mut toolkit = Toolkit::with_control_tools()?;
    toolkit.register(Arc::new(Typed(ReadTool)))?;
    toolkit.register(Arc::new(ListTool))?;
    Ok(toolkit)
}
