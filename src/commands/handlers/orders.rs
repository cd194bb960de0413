//! Sales and purchase order commands.

use super::require_change;
use crate::cli::OrderAction;
use crate::commands::CommandContext;
use crate::db::ConnectionPool;
use crate::error::Result;
use crate::output::{print_message, print_rows};
use crate::pharmacy::{OrderKind, Orders};
use serde_json::json;

pub async fn orders<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    kind: OrderKind,
    action: OrderAction,
) -> Result<()> {
    let orders = Orders::new(ctx.db, kind);

    match action {
        OrderAction::List => {
            let rows = orders.list().await?;
            print_rows(ctx.format, &rows, &format!("No {kind} orders found."))
        }
        OrderAction::Items { order_id } => {
            let rows = orders.items(order_id).await?;
            print_rows(ctx.format, &rows, &format!("Order #{order_id} has no items."))
        }
        OrderAction::Create {
            party,
            lines,
            atomic,
        } => {
            let quantities: Vec<(u64, u32)> = lines
                .iter()
                .map(|l| (l.medicine_id, l.quantity))
                .collect();
            let draft = orders.draft_at_list_price(party, &quantities).await?;
            let order_id = if atomic {
                orders.create_atomic(&draft).await?
            } else {
                orders.create(&draft).await?
            };
            print_message(
                ctx.format,
                &json!({
                    "kind": kind.to_string(),
                    "order_id": order_id,
                    "lines": draft.lines,
                    "total": draft.total(),
                }),
                &format!(
                    "Created {kind} order #{order_id} with {} line(s), total {}",
                    draft.lines.len(),
                    draft.total()
                ),
            )
        }
        OrderAction::Delete { order_id } => {
            let removed = require_change(orders.delete(order_id).await?, "order", order_id)?;
            print_message(
                ctx.format,
                &json!({ "kind": kind.to_string(), "order_id": order_id, "deleted": removed }),
                &format!("Deleted {kind} order #{order_id}"),
            )
        }
    }
}
