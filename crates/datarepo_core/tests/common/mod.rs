//! Shared shop fixture for integration tests.
#![allow(dead_code)]

use datarepo_core::rusqlite::types::Value;
use datarepo_core::{
    impl_from_columns, ContextOptions, DataContext, DataError, DataResult, Entity, Migration,
    NavigationPath, ValidationFailure,
};
use std::path::Path;

pub const SHOP_SCHEMA: &[Migration] = &[Migration::new(
    1,
    "CREATE TABLE customers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        version INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        total_cents INTEGER NOT NULL CHECK (total_cents >= 0),
        status TEXT NOT NULL DEFAULT 'open'
    );
    CREATE TABLE order_lines (
        id INTEGER PRIMARY KEY,
        order_id INTEGER NOT NULL REFERENCES orders(id),
        sku TEXT NOT NULL,
        quantity INTEGER NOT NULL
    );",
)];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Customer {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub version: i64,
    pub orders: Vec<Order>,
}

impl_from_columns!(Customer { id, name, email, version });

impl Customer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_id(id: i64, name: &str) -> Self {
        Self {
            id: Some(id),
            ..Self::new(name)
        }
    }
}

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
        let mut failures = Vec::new();
        if self.name.trim().is_empty() {
            failures.push(ValidationFailure::new("Name", "must not be empty"));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                failures.push(ValidationFailure::new("Email", "must contain @"));
            }
        }
        failures
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

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    pub id: Option<i64>,
    pub customer_id: i64,
    pub total_cents: i64,
    pub status: String,
    pub customer: Option<Box<Customer>>,
    pub lines: Vec<OrderLine>,
}

impl_from_columns!(Order {
    id,
    customer_id,
    total_cents,
    status
});

impl Order {
    pub fn new(id: i64, customer_id: i64, total_cents: i64) -> Self {
        Self {
            id: Some(id),
            customer_id,
            total_cents,
            status: "open".to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Order {
    type Key = i64;

    const TABLE: &'static str = "orders";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["id", "customer_id", "total_cents", "status"];

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
            ("status", Value::Text(self.status.clone())),
        ]
    }

    fn include(
        ctx: &DataContext,
        orders: &mut [Self],
        path: &NavigationPath,
        tracking: bool,
    ) -> DataResult<()> {
        if path.head_is("lines") {
            let keys = orders
                .iter()
                .filter_map(|order| order.id)
                .map(Value::Integer)
                .collect();
            let mut lines: Vec<OrderLine> = ctx.load_related("order_id", keys, tracking)?;
            path.include_rest(ctx, &mut lines, tracking)?;
            for order in orders.iter_mut() {
                order.lines = lines
                    .iter()
                    .filter(|line| Some(line.order_id) == order.id)
                    .cloned()
                    .collect();
            }
            return Ok(());
        }

        if path.head_is("customer") {
            let keys = orders
                .iter()
                .map(|order| Value::Integer(order.customer_id))
                .collect();
            let mut customers: Vec<Customer> = ctx.load_related("id", keys, tracking)?;
            path.include_rest(ctx, &mut customers, tracking)?;
            for order in orders.iter_mut() {
                order.customer = customers
                    .iter()
                    .find(|customer| customer.id == Some(order.customer_id))
                    .cloned()
                    .map(Box::new);
            }
            return Ok(());
        }

        Err(DataError::UnknownNavigation {
            entity: Self::TABLE,
            path: path.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLine {
    pub id: Option<i64>,
    pub order_id: i64,
    pub sku: String,
    pub quantity: i64,
}

impl_from_columns!(OrderLine {
    id,
    order_id,
    sku,
    quantity
});

impl OrderLine {
    pub fn new(id: i64, order_id: i64, sku: &str, quantity: i64) -> Self {
        Self {
            id: Some(id),
            order_id,
            sku: sku.to_string(),
            quantity,
        }
    }
}

impl Entity for OrderLine {
    type Key = i64;

    const TABLE: &'static str = "order_lines";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["id", "order_id", "sku", "quantity"];

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn on_inserted(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn write_columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("order_id", Value::Integer(self.order_id)),
            ("sku", Value::Text(self.sku.clone())),
            ("quantity", Value::Integer(self.quantity)),
        ]
    }
}

pub fn open_shop() -> DataContext {
    DataContext::open_in_memory(&ContextOptions::default(), SHOP_SCHEMA).unwrap()
}

pub fn open_shop_file(path: &Path) -> DataContext {
    DataContext::open(path, &ContextOptions::default(), SHOP_SCHEMA).unwrap()
}

/// Seeds customers 1 and 2, orders 10/11 for customer 1 and 12 for customer 2,
/// plus two lines on order 10.
pub fn seed_shop(ctx: &DataContext) {
    ctx.connection()
        .execute_batch(
            "INSERT INTO customers (id, name, email) VALUES
                (1, 'Ada', 'ada@example.com'),
                (2, 'Grace', 'grace@example.com');
             INSERT INTO orders (id, customer_id, total_cents, status) VALUES
                (10, 1, 1500, 'open'),
                (11, 1, 250, 'shipped'),
                (12, 2, 990, 'open');
             INSERT INTO order_lines (id, order_id, sku, quantity) VALUES
                (100, 10, 'BOOK-1', 1),
                (101, 10, 'PEN-3', 3);",
        )
        .unwrap();
}

pub fn count_rows(ctx: &DataContext, table: &str) -> i64 {
    ctx.connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
            row.get(0)
        })
        .unwrap()
}
