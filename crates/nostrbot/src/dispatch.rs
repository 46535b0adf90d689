use crate::bot::{Bot, BotContext};
use crate::pool::PoolError;
use crate::validator;

/// Drive one bot: subscribe to its query and feed it verified events in
/// arrival order until cancelled.
///
/// The pool is connected before the query is built, so queries may fetch.
/// Handler errors are logged and the loop moves on to the next event. The
/// subscription stream ending on its own is a transport failure and is
/// returned as [`DispatchError::StreamClosed`]; cancellation returns `Ok`.
/// [`Bot::finish`] runs on every exit path.
pub async fn run(mut bot: Box<dyn Bot>, ctx: BotContext) -> Result<(), DispatchError> {
    let result = drive(&mut *bot, &ctx).await;
    bot.finish(&ctx).await;
    result
}

async fn drive(bot: &mut dyn Bot, ctx: &BotContext) -> Result<(), DispatchError> {
    let cancel = ctx.cancel_token().clone();
    let name = bot.name().to_string();

    ctx.pool().connect().await?;
    let filter = bot.query(ctx).await.map_err(DispatchError::Query)?;

    tracing::info!(
        bot = %name,
        filter = %serde_json::to_string(&filter).unwrap_or_default(),
        relays = ?ctx.pool().relays(),
        "running query"
    );

    let mut sub = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        sub = ctx.pool().subscribe(filter, true) => sub?,
    };

    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(bot = %name, "cancelled");
                return Ok(());
            }
            next = sub.next() => match next {
                Some(raw) => raw,
                None => return Err(DispatchError::StreamClosed),
            },
        };

        let Some(event) = validator::check(&name, &raw) else {
            continue;
        };
        let event_id = event.id.to_hex();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(bot = %name, event_id = %event_id, "cancelled while handling event");
                return Ok(());
            }
            result = bot.handle_event(ctx, event) => {
                if let Err(e) = result {
                    let error = format!("{:#}", e);
                    tracing::error!(bot = %name, event_id = %event_id, error = %error, "handle_event failed");
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to build query: {0:#}")]
    Query(anyhow::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("subscription stream closed")]
    StreamClosed,
}
