//! datarepo CLI: seed and inspect a demo shop database through the
//! repository surface. Logging is configured from `DATAREPO_LOG_LEVEL` and
//! `DATAREPO_LOG_DIR`.

mod shop;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datarepo_core::{
    default_log_level, init_logging, ContextFactory, ContextOptions, ContextRepository, DbTarget,
    Filter, Repository, SortDirection, SqlParameter,
};
use log::info;
use shop::{Customer, Order, OrderTotals, ORDER_TOTALS_BODY, ORDER_TOTALS_PROCEDURE, SHOP_SCHEMA};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "datarepo")]
#[command(about = "Demo shop over the datarepo unit of work", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file; an in-memory database is used when omitted.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON file with context options.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a customer with some orders in one unit of work.
    Seed {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: Option<String>,
        /// Order totals in cents.
        #[arg(short, long)]
        orders: Vec<i64>,
    },
    /// List customers, optionally with their orders.
    List {
        #[arg(short, long)]
        name_like: Option<String>,
        #[arg(long)]
        with_orders: bool,
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Run the order totals procedure for one customer.
    Totals {
        #[arg(short, long)]
        customer_id: i64,
    },
    /// Delete a customer and their orders.
    Remove {
        #[arg(short, long)]
        customer_id: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    start_logging()?;

    let options = load_options(cli.config.as_deref())?;
    let target = match cli.db {
        Some(path) => DbTarget::File(path),
        None => DbTarget::Memory,
    };
    let factory = ContextFactory::new(target, options, SHOP_SCHEMA);
    info!(
        "event=cli_start module=cli status=ok mode={}",
        factory.target().mode()
    );

    match cli.command {
        Commands::Seed {
            name,
            email,
            orders,
        } => seed(&factory, name, email, orders),
        Commands::List {
            name_like,
            with_orders,
            limit,
        } => list(&factory, name_like, with_orders, limit),
        Commands::Totals { customer_id } => totals(&factory, customer_id),
        Commands::Remove { customer_id } => remove(&factory, customer_id),
    }
}

fn start_logging() -> Result<()> {
    let Ok(dir) = std::env::var("DATAREPO_LOG_DIR") else {
        return Ok(());
    };
    let level =
        std::env::var("DATAREPO_LOG_LEVEL").unwrap_or_else(|_| default_log_level().to_string());
    init_logging(&level, &dir).map_err(anyhow::Error::msg)
}

fn load_options(path: Option<&std::path::Path>) -> Result<ContextOptions> {
    let Some(path) = path else {
        return Ok(ContextOptions::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config `{}`", path.display()))
}

fn seed(
    factory: &ContextFactory,
    name: String,
    email: Option<String>,
    totals: Vec<i64>,
) -> Result<()> {
    let (customer_id, affected) = factory.scope(|ctx| {
        let customers = ContextRepository::<Customer>::new(ctx);
        let entry = customers.insert(Customer {
            name,
            email,
            ..Customer::default()
        })?;
        customers.save_changes()?;
        let customer_id = customers
            .tracked(entry)
            .and_then(|customer| customer.id)
            .unwrap_or_default();

        let orders = ContextRepository::<Order>::new(ctx);
        for total_cents in totals {
            orders.insert(Order {
                id: None,
                customer_id,
                total_cents,
            })?;
        }
        Ok((customer_id, orders.save_changes()?))
    })?;

    println!("customer id={customer_id} orders={affected}");
    Ok(())
}

fn list(
    factory: &ContextFactory,
    name_like: Option<String>,
    with_orders: bool,
    limit: u32,
) -> Result<()> {
    let customers = factory.scope(|ctx| {
        let repo = ContextRepository::<Customer>::new(ctx);
        let includes: &[&str] = if with_orders { &["orders"] } else { &[] };
        repo.query(name_like.map(|pattern| Filter::like("name", pattern)), includes)?
            .tracking(false)
            .order_by("id", SortDirection::Asc)
            .limit(limit)
            .to_vec()
    })?;

    for customer in customers {
        println!(
            "{}\t{}\t{}",
            customer.id.unwrap_or_default(),
            customer.name,
            customer.email.as_deref().unwrap_or("-")
        );
        for order in &customer.orders {
            println!(
                "\torder={} total_cents={}",
                order.id.unwrap_or_default(),
                order.total_cents
            );
        }
    }
    Ok(())
}

fn totals(factory: &ContextFactory, customer_id: i64) -> Result<()> {
    let (rows, params) = factory.scope(|ctx| {
        ctx.create_procedure(ORDER_TOTALS_PROCEDURE, ORDER_TOTALS_BODY)?;
        let mut params = [
            SqlParameter::input("customer_id", customer_id),
            SqlParameter::output("order_count"),
        ];
        let rows: Vec<OrderTotals> =
            ctx.execute_stored_procedure_list(ORDER_TOTALS_PROCEDURE, &mut params)?;
        Ok((rows, params))
    })?;

    let totals = rows.into_iter().next().unwrap_or_default();
    println!(
        "customer={customer_id} orders={} total_cents={} output={:?}",
        totals.order_count,
        totals.total_cents,
        params[1].output_value()
    );
    Ok(())
}

fn remove(factory: &ContextFactory, customer_id: i64) -> Result<()> {
    let affected = factory.scope(|ctx| {
        let customers = ContextRepository::<Customer>::new(ctx);
        let orders = ContextRepository::<Order>::new(ctx);
        let Some(customer) = customers.get_by_id(&customer_id)? else {
            return Ok(0);
        };
        for order in orders
            .table()
            .filter(Filter::eq("customer_id", customer_id))
            .to_vec()?
        {
            orders.delete(order)?;
        }
        customers.delete(customer)?;
        customers.save_changes()
    })?;

    println!("removed rows={affected}");
    Ok(())
}
