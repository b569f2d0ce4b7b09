pub mod dispatcher;
pub mod evaluator;
pub mod handler;
pub mod matcher;
pub mod template;

use crate::error::Result;
use crate::message::ParsedMessage;
use crate::sieve::ast::Script;

use self::dispatcher::ActionDispatcher;
use self::handler::{DeliveryHandler, MessageRef};

/// Evaluates `script` for `message` and delivers the outcome through `handler`.
pub fn apply<H: DeliveryHandler + ?Sized>(
    script: &Script,
    message: &ParsedMessage,
    handler: &mut H,
    account: &str,
) -> Result<Vec<MessageRef>> {
    let evaluation = evaluator::evaluate(script, message)?;
    tracing::debug!(
        actions = evaluation.actions.len(),
        implicit_keep = evaluation.implicit_keep,
        "script evaluated"
    );
    let mut dispatcher = ActionDispatcher::new(handler, message, account);
    dispatcher.collect(evaluation);
    dispatcher.dispatch()
}
