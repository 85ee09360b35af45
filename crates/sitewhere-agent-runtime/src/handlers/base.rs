use crate::handler::CommandHandler;
use crate::registry::OperationRegistry;

/// Handler with no application operations and default hooks.
///
/// Useful for agents that only publish events.
#[derive(Debug, Default)]
pub struct BaseHandler;

impl BaseHandler {
    pub const NAME: &'static str = "BaseHandler";
}

impl CommandHandler for BaseHandler {
    fn operations(_registry: &mut OperationRegistry<Self>) {}
}
