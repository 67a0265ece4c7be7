mod common;

use common::{open_shop, open_shop_file, seed_shop, Customer, SHOP_SCHEMA};
use datarepo_core::rusqlite::types::Value;
use datarepo_core::{
    build_procedure_command, ContextOptions, ContextRepository, DataContext, DataError,
    ParameterDirection, Repository, SqlParameter,
};
use std::time::Duration;

const CUSTOMERS_BY_NAME: &str =
    "SELECT id, name, email, version FROM customers WHERE name LIKE @pattern ORDER BY id";
const CUSTOMER_STATS: &str =
    "SELECT COUNT(*) AS total, MAX(id) AS max_id FROM customers WHERE id >= @min_id";

fn shop_with_procedures() -> datarepo_core::DataContext {
    let ctx = open_shop();
    seed_shop(&ctx);
    ctx.create_procedure("customers_by_name", CUSTOMERS_BY_NAME)
        .unwrap();
    ctx.create_procedure("customer_stats", CUSTOMER_STATS).unwrap();
    ctx
}

#[test]
fn procedure_rows_map_onto_entities() {
    let ctx = shop_with_procedures();
    let repo = ContextRepository::<Customer>::new(&ctx);

    let mut params = [SqlParameter::input("pattern", "G%")];
    let rows: Vec<Customer> = repo
        .execute_stored_procedure_list("customers_by_name", &mut params)
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, Some(2));
    assert_eq!(rows[0].name, "Grace");
    assert_eq!(repo.state_of(&2), datarepo_core::EntityState::Detached);
}

#[test]
fn output_parameters_receive_values_from_the_result() {
    let ctx = shop_with_procedures();

    let mut params = [
        SqlParameter::input("min_id", 1_i64),
        SqlParameter::output("total"),
        SqlParameter::output("@max_id"),
    ];
    assert_eq!(
        build_procedure_command("customer_stats", &params).unwrap(),
        "customer_stats @min_id, @total output, @max_id output"
    );

    let totals: Vec<i64> = ctx
        .execute_stored_procedure_list("customer_stats", &mut params)
        .unwrap();

    assert_eq!(totals, vec![2]);
    assert_eq!(params[0].output_value(), None);
    assert_eq!(params[1].output_value(), Some(&Value::Integer(2)));
    assert_eq!(params[2].output_value(), Some(&Value::Integer(2)));
    assert_eq!(params[2].direction(), ParameterDirection::Out);
}

#[test]
fn input_output_parameters_are_bound_and_overwritten() {
    let ctx = open_shop();
    ctx.create_procedure("bump", "SELECT @counter + 1 AS counter")
        .unwrap();

    let mut params = [SqlParameter::input_output("counter", 41_i64)];
    let _: Vec<i64> = ctx
        .execute_stored_procedure_list("bump", &mut params)
        .unwrap();
    assert_eq!(params[0].output_value(), Some(&Value::Integer(42)));
}

#[test]
fn outputs_are_cleared_when_a_call_returns_no_rows() {
    let ctx = open_shop();
    seed_shop(&ctx);
    ctx.create_procedure("customer_total", "SELECT id AS total FROM customers WHERE id = @id")
        .unwrap();

    let mut params = [SqlParameter::input("id", 2_i64), SqlParameter::output("total")];
    let _: Vec<i64> = ctx
        .execute_stored_procedure_list("customer_total", &mut params)
        .unwrap();
    assert_eq!(params[1].output_value(), Some(&Value::Integer(2)));

    params[0] = SqlParameter::input("id", 99_i64);
    let rows: Vec<i64> = ctx
        .execute_stored_procedure_list("customer_total", &mut params)
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(params[1].output_value(), None);
}

#[test]
fn command_text_selects_catalog_procedures_case_insensitively() {
    let ctx = shop_with_procedures();

    let mut params = [
        SqlParameter::input("@min_id", 2_i64),
        SqlParameter::output("total"),
    ];
    let totals: Vec<i64> = ctx
        .execute_stored_procedure("EXEC Customer_Stats @min_id, @total output", &mut params)
        .unwrap();
    assert_eq!(totals, vec![1]);
    assert_eq!(params[1].output_value(), Some(&Value::Integer(1)));
}

#[test]
fn unknown_command_text_runs_as_raw_sql() {
    let ctx = shop_with_procedures();

    let mut params = [SqlParameter::input("customer", 1_i64)];
    let counts: Vec<i64> = ctx
        .execute_stored_procedure(
            "SELECT COUNT(*) FROM orders WHERE customer_id = @customer",
            &mut params,
        )
        .unwrap();
    assert_eq!(counts, vec![2]);
}

#[test]
fn missing_procedures_are_reported_by_name() {
    let ctx = open_shop();

    let err = ctx
        .execute_stored_procedure_list::<i64>("missing_proc", &mut [])
        .unwrap_err();
    match err {
        DataError::ProcedureNotFound(name) => assert_eq!(name, "missing_proc"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unbindable_parameters_fail_before_execution() {
    let ctx = shop_with_procedures();

    let mut params = [SqlParameter::input("min_id", u64::MAX)];
    let err = ctx
        .execute_stored_procedure_list::<i64>("customer_stats", &mut params)
        .unwrap_err();
    match err {
        DataError::UnsupportedParameterType { parameter, .. } => assert_eq!(parameter, "min_id"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unnamed_parameters_cannot_build_a_procedure_call() {
    let ctx = shop_with_procedures();

    let mut params = [SqlParameter::positional(1_i64)];
    let err = ctx
        .execute_stored_procedure_list::<i64>("customer_stats", &mut params)
        .unwrap_err();
    assert!(matches!(err, DataError::ArgumentNull("parameter name")));
}

#[test]
fn long_running_procedures_hit_the_command_timeout() {
    let ctx = open_shop();
    assert_eq!(ctx.command_timeout(), Duration::from_secs(300));
    ctx.create_procedure(
        "spin",
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n LIMIT 100000000)
         SELECT count(*) FROM n",
    )
    .unwrap();

    ctx.set_command_timeout(Duration::ZERO);
    let err = ctx
        .execute_stored_procedure_list::<i64>("spin", &mut [])
        .unwrap_err();
    assert!(matches!(err, DataError::Timeout(limit) if limit == Duration::ZERO));

    ctx.set_command_timeout(Duration::from_secs(300));
    let rows: Vec<i64> = ctx
        .execute_raw_query("SELECT 1", &[])
        .unwrap();
    assert_eq!(rows, vec![1]);
}

#[test]
fn oversized_timeouts_mean_no_limit() {
    let options = ContextOptions {
        command_timeout_secs: u64::MAX,
        ..ContextOptions::default()
    };
    let ctx = DataContext::open_in_memory(&options, SHOP_SCHEMA).unwrap();
    ctx.create_procedure("answer", "SELECT 42").unwrap();
    let rows: Vec<i64> = ctx
        .execute_stored_procedure_list("answer", &mut [])
        .unwrap();
    assert_eq!(rows, vec![42]);

    ctx.set_command_timeout(Duration::MAX);
    let rows: Vec<i64> = ctx.execute_raw_query("SELECT 1", &[]).unwrap();
    assert_eq!(rows, vec![1]);
}

#[test]
fn procedure_definitions_are_checked_when_created() {
    let ctx = open_shop();

    assert!(matches!(
        ctx.create_procedure("bad name;", "SELECT 1"),
        Err(DataError::InvalidOperation(_))
    ));
    assert!(matches!(
        ctx.create_procedure("", "SELECT 1"),
        Err(DataError::ArgumentNull("procedure name"))
    ));
    assert!(matches!(
        ctx.create_procedure("empty", "  "),
        Err(DataError::ArgumentNull("procedure body"))
    ));
    assert!(matches!(
        ctx.create_procedure("broken", "SELEC nothing"),
        Err(DataError::Db(_))
    ));
}

#[test]
fn procedures_can_be_replaced_and_dropped() {
    let ctx = open_shop();
    ctx.create_procedure("answer", "SELECT 41").unwrap();
    ctx.create_procedure("answer", "SELECT 42").unwrap();

    let rows: Vec<i64> = ctx
        .execute_stored_procedure_list("answer", &mut [])
        .unwrap();
    assert_eq!(rows, vec![42]);

    assert!(ctx.drop_procedure("ANSWER").unwrap());
    assert!(!ctx.drop_procedure("answer").unwrap());
    assert!(matches!(
        ctx.execute_stored_procedure_list::<i64>("answer", &mut []),
        Err(DataError::ProcedureNotFound(_))
    ));
}

#[test]
fn procedure_catalog_outlives_the_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");
    {
        let ctx = open_shop_file(&path);
        seed_shop(&ctx);
        ctx.create_procedure("customer_stats", CUSTOMER_STATS).unwrap();
        ctx.close().unwrap();
    }

    let ctx = open_shop_file(&path);
    let mut params = [SqlParameter::input("min_id", 0_i64)];
    let totals: Vec<i64> = ctx
        .execute_stored_procedure_list("customer_stats", &mut params)
        .unwrap();
    assert_eq!(totals, vec![2]);
}
