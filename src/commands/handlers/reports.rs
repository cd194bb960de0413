//! Read-mostly commands: status, analytics, procedures, sandbox and roles.

use crate::cli::{ProcedureCall, SandboxAction};
use crate::commands::CommandContext;
use crate::db::{ConnectionPool, Row};
use crate::error::{PharmaError, Result};
use crate::output::{print_message, print_rows, print_section, record_table, OutputFormat};
use crate::pharmacy::{self, Analytics, Procedures, Role, RoleViews, SaleOutcome, Sandbox};
use serde_json::{json, Value as JsonValue};

pub async fn status<P: ConnectionPool>(ctx: &CommandContext<'_, P>) -> Result<()> {
    pharmacy::ping(ctx.db).await?;
    let pool = ctx.db.pool().status();

    match ctx.format {
        OutputFormat::Json => print_message(
            ctx.format,
            &json!({ "target": ctx.target, "connected": true, "pool": pool }),
            "",
        ),
        OutputFormat::Table => {
            record_table([
                ("Database", ctx.target.to_string()),
                ("Connected", "yes".to_string()),
                ("Open connections", pool.size.to_string()),
                ("Idle connections", pool.idle.to_string()),
                ("Pool limit", pool.max_size.to_string()),
            ])
            .printstd();
            Ok(())
        }
    }
}

pub async fn analytics<P: ConnectionPool>(ctx: &CommandContext<'_, P>) -> Result<()> {
    let analytics = Analytics::new(ctx.db);
    let kpis = analytics.kpis().await?;
    let daily = analytics.daily_revenue().await?;
    let by_category = analytics.revenue_by_category().await?;

    match ctx.format {
        OutputFormat::Json => print_message(
            ctx.format,
            &json!({
                "kpis": kpis,
                "daily_revenue": daily,
                "revenue_by_category": by_category,
            }),
            "",
        ),
        OutputFormat::Table => {
            record_table([
                ("Medicines", kpis.medicines.to_string()),
                ("Suppliers", kpis.suppliers.to_string()),
                ("Customers", kpis.customers.to_string()),
                ("Total Sales", kpis.total_sales.round_dp(2).to_string()),
                ("Stock Value", kpis.stock_value.round_dp(2).to_string()),
            ])
            .printstd();
            println!("Daily Revenue");
            print_rows(ctx.format, &daily, "No revenue data yet.")?;
            println!("Revenue by Category");
            print_rows(ctx.format, &by_category, "No category revenue data yet.")
        }
    }
}

pub async fn procedure<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    call: ProcedureCall,
) -> Result<()> {
    match call {
        ProcedureCall::MedicinesByCategory { category } => {
            let rows = Procedures::new(ctx.db)
                .medicines_by_category(&category)
                .await?;
            print_rows(
                ctx.format,
                &rows,
                &format!("No medicines found in category '{category}'."),
            )
        }
    }
}

pub async fn sandbox<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    action: SandboxAction,
) -> Result<()> {
    let sandbox = Sandbox::new(ctx.db);

    match action {
        SandboxAction::Sell { medicine, quantity } => {
            let outcome = sandbox.simulate_sale(medicine, quantity).await?;
            stock_report(ctx, &sandbox, medicine, Some(&outcome)).await
        }
        SandboxAction::Status { medicine } => stock_report(ctx, &sandbox, medicine, None).await,
    }
}

async fn stock_report<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    sandbox: &Sandbox<'_, P>,
    medicine_id: u64,
    sale: Option<&SaleOutcome>,
) -> Result<()> {
    let stock = sandbox
        .stock_level(medicine_id)
        .await?
        .ok_or_else(|| PharmaError::validation(format!("No medicine with id {medicine_id}")))?;
    let alerts = sandbox.alerts(medicine_id).await?;

    match ctx.format {
        OutputFormat::Json => {
            print_message(ctx.format, &stock_report_json(sale, &stock, &alerts), "")
        }
        OutputFormat::Table => {
            if let Some(sale) = sale {
                println!(
                    "Sold {} unit(s) of medicine #{} on sales order #{}",
                    sale.quantity, sale.medicine_id, sale.order_id
                );
            }
            print_section(ctx.format, "Updated Stock Level", &[stock])?;
            print_section(ctx.format, "Stock Alerts", &alerts)
        }
    }
}

/// One JSON document for a stock report, with the sale that caused it.
fn stock_report_json(sale: Option<&SaleOutcome>, stock: &Row, alerts: &[Row]) -> JsonValue {
    let mut report = json!({ "stock": stock, "alerts": alerts });
    if let Some(sale) = sale {
        report["sale"] = json!(sale);
    }
    report
}

pub async fn role<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    role: Role,
    id: Option<u64>,
) -> Result<()> {
    let sections = RoleViews::new(ctx.db).view(role, id).await?;
    match ctx.format {
        OutputFormat::Json => print_message(
            ctx.format,
            &json!({ "role": role.to_string(), "sections": sections }),
            "",
        ),
        OutputFormat::Table => {
            for section in &sections {
                print_section(ctx.format, &section.title, &section.rows)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;
    use rust_decimal::Decimal;

    fn stock_row() -> Row {
        Row::new(vec![
            ("MedicineID".to_string(), Value::Int(4)),
            ("StockQty".to_string(), Value::Int(9)),
        ])
    }

    #[test]
    fn test_sale_report_is_one_document() {
        let sale = SaleOutcome {
            order_id: 77,
            customer_id: 1,
            medicine_id: 4,
            quantity: 2,
            unit_price: Decimal::new(1250, 2),
        };
        let report = stock_report_json(Some(&sale), &stock_row(), &[]);

        assert_eq!(report["sale"]["order_id"], 77);
        assert_eq!(report["stock"]["StockQty"], 9);
        assert!(report["alerts"].as_array().unwrap().is_empty());

        let text = serde_json::to_string(&report).unwrap();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_status_report_has_no_sale() {
        let report = stock_report_json(None, &stock_row(), &[stock_row()]);
        assert!(report.get("sale").is_none());
        assert_eq!(report["alerts"].as_array().unwrap().len(), 1);
    }
}
