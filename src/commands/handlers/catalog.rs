//! Medicine, supplier and customer commands.

use super::require_change;
use crate::cli::{CustomerAction, MedicineAction, SupplierAction};
use crate::commands::CommandContext;
use crate::db::ConnectionPool;
use crate::error::Result;
use crate::output::{print_message, print_rows};
use crate::pharmacy::catalog::{self, CrudTable};
use crate::pharmacy::{
    CustomerUpdate, MedicineUpdate, NewCustomer, NewMedicine, NewRecord, NewSupplier,
    RecordUpdate, SupplierUpdate, CUSTOMERS, MEDICINES, SUPPLIERS,
};
use serde_json::json;

pub async fn medicines<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    action: MedicineAction,
) -> Result<()> {
    match action {
        MedicineAction::List => list(ctx, &MEDICINES).await,
        MedicineAction::Add(args) => {
            let record = NewMedicine {
                name: args.name,
                manufacturer: args.manufacturer,
                price: args.price,
                stock_qty: args.stock,
                reorder_level: args.reorder_level,
                category_id: args.category_id,
            };
            add(ctx, &MEDICINES, &record).await
        }
        MedicineAction::Update { id, price, stock } => {
            let update = MedicineUpdate {
                price,
                stock_qty: stock,
            };
            update_record(ctx, &MEDICINES, id, &update).await
        }
        MedicineAction::Delete { id } => delete(ctx, &MEDICINES, id).await,
        MedicineAction::Categories => {
            let categories = catalog::categories(ctx.db).await?;
            let lines: Vec<String> = categories
                .iter()
                .map(|c| format!("{:>4}  {}", c.id, c.name))
                .collect();
            print_message(ctx.format, &categories, &lines.join("\n"))
        }
    }
}

pub async fn suppliers<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    action: SupplierAction,
) -> Result<()> {
    match action {
        SupplierAction::List => list(ctx, &SUPPLIERS).await,
        SupplierAction::Add {
            name,
            contact,
            address,
            email,
            phone,
        } => {
            let record = NewSupplier {
                name,
                contact,
                address,
                email,
                phone,
            };
            add(ctx, &SUPPLIERS, &record).await
        }
        SupplierAction::Update { id, contact, phone } => {
            update_record(ctx, &SUPPLIERS, id, &SupplierUpdate { contact, phone }).await
        }
        SupplierAction::Delete { id } => delete(ctx, &SUPPLIERS, id).await,
    }
}

pub async fn customers<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    action: CustomerAction,
) -> Result<()> {
    match action {
        CustomerAction::List => list(ctx, &CUSTOMERS).await,
        CustomerAction::Add {
            name,
            email,
            phone,
            address,
        } => {
            let record = NewCustomer {
                name,
                email,
                phone,
                address,
            };
            add(ctx, &CUSTOMERS, &record).await
        }
        CustomerAction::Update { id, phone, address } => {
            update_record(ctx, &CUSTOMERS, id, &CustomerUpdate { phone, address }).await
        }
        CustomerAction::Delete { id } => delete(ctx, &CUSTOMERS, id).await,
    }
}

async fn list<P: ConnectionPool>(ctx: &CommandContext<'_, P>, table: &CrudTable) -> Result<()> {
    let rows = table.list(ctx.db).await?;
    print_rows(ctx.format, &rows, &format!("No {} records found.", table.label))
}

async fn add<P: ConnectionPool, R: NewRecord>(
    ctx: &CommandContext<'_, P>,
    table: &CrudTable,
    record: &R,
) -> Result<()> {
    let id = table.insert(ctx.db, record).await?;
    print_message(
        ctx.format,
        &json!({ "table": table.table, "id": id }),
        &format!("Added {} #{}", table.label, id),
    )
}

async fn update_record<P: ConnectionPool, U: RecordUpdate>(
    ctx: &CommandContext<'_, P>,
    table: &CrudTable,
    id: u64,
    update: &U,
) -> Result<()> {
    let changed = require_change(table.update(ctx.db, id, update).await?, table.label, id)?;
    print_message(
        ctx.format,
        &json!({ "table": table.table, "id": id, "changed": changed }),
        &format!("Updated {} #{}", table.label, id),
    )
}

async fn delete<P: ConnectionPool>(
    ctx: &CommandContext<'_, P>,
    table: &CrudTable,
    id: u64,
) -> Result<()> {
    let removed = require_change(table.delete(ctx.db, id).await?, table.label, id)?;
    print_message(
        ctx.format,
        &json!({ "table": table.table, "id": id, "deleted": removed }),
        &format!("Deleted {} #{}", table.label, id),
    )
}
