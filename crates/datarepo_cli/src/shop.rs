//! Demo shop schema used by the CLI commands.

use datarepo_core::rusqlite::types::Value;
use datarepo_core::{
    impl_from_columns, DataContext, DataError, DataResult, Entity, Migration, NavigationPath,
    ValidationFailure,
};

pub const SHOP_SCHEMA: &[Migration] = &[Migration::new(
    1,
    "CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        version INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        total_cents INTEGER NOT NULL CHECK (total_cents >= 0)
    );",
)];

pub const ORDER_TOTALS_PROCEDURE: &str = "order_totals";
pub const ORDER_TOTALS_BODY: &str = "SELECT COUNT(*) AS order_count, \
     COALESCE(SUM(total_cents), 0) AS total_cents \
     FROM orders WHERE customer_id = @customer_id";

#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub version: i64,
    pub orders: Vec<Order>,
}

impl_from_columns!(Customer { id, name, email, version });

impl Entity for Customer {
    type Key = i64;

    const TABLE: &'static str = "customers";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["id", "name", "email", "version"];
    const CONCURRENCY_COLUMN: Option<&'static str> = Some("version");

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn on_inserted(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn write_columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("email", Value::from(self.email.clone())),
        ]
    }

    fn validate(&self) -> Vec<ValidationFailure> {
        if self.name.trim().is_empty() {
            return vec![ValidationFailure::new("Name", "must not be empty")];
        }
        Vec::new()
    }

    fn concurrency_token(&self) -> Option<i64> {
        (self.version > 0).then_some(self.version)
    }

    fn set_concurrency_token(&mut self, token: i64) {
        self.version = token;
    }

    fn include(
        ctx: &DataContext,
        customers: &mut [Self],
        path: &NavigationPath,
        tracking: bool,
    ) -> DataResult<()> {
        if !path.head_is("orders") {
            return Err(DataError::UnknownNavigation {
                entity: Self::TABLE,
                path: path.to_string(),
            });
        }
        let keys = customers
            .iter()
            .filter_map(|customer| customer.id)
            .map(Value::Integer)
            .collect();
        let mut orders: Vec<Order> = ctx.load_related("customer_id", keys, tracking)?;
        path.include_rest(ctx, &mut orders, tracking)?;
        for customer in customers.iter_mut() {
            customer.orders = orders
                .iter()
                .filter(|order| Some(order.customer_id) == customer.id)
                .cloned()
                .collect();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: Option<i64>,
    pub customer_id: i64,
    pub total_cents: i64,
}

impl_from_columns!(Order {
    id,
    customer_id,
    total_cents
});

impl Entity for Order {
    type Key = i64;

    const TABLE: &'static str = "orders";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["id", "customer_id", "total_cents"];

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn on_inserted(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn write_columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("customer_id", Value::Integer(self.customer_id)),
            ("total_cents", Value::Integer(self.total_cents)),
        ]
    }
}

/// Aggregates returned by the order totals procedure.
#[derive(Debug, Default)]
pub struct OrderTotals {
    pub order_count: i64,
    pub total_cents: i64,
}

impl_from_columns!(OrderTotals {
    order_count,
    total_cents
});
