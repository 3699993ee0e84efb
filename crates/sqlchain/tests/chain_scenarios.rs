//! End-to-end chain scenarios: build chains against an in-memory warehouse
//! and check the compiled SQL.

use std::sync::Arc;

use proptest::prelude::*;
use sqlchain::{
    ArgValue, Arguments, Chain, ChainConfig, ChainError, Column, CompileStyle, Session,
    StaticWarehouse, StepOptions, TableName,
};

fn warehouse() -> StaticWarehouse {
    StaticWarehouse::new()
        .with_table(
            TableName::new("DB", "PUBLIC", "ORDERS"),
            vec![
                Column::typed("ID", "NUMBER"),
                Column::typed("AMOUNT", "NUMBER"),
                Column::typed("DATE", "DATE"),
            ],
        )
        .with_table(
            TableName::new("DB", "PUBLIC", "SALES"),
            vec![
                Column::typed("ID", "NUMBER"),
                Column::typed("CUSTOMER_ID", "NUMBER"),
                Column::typed("REGION", "VARCHAR"),
                Column::typed("AMOUNT", "NUMBER"),
            ],
        )
        .with_table(
            TableName::new("DB", "PUBLIC", "CUSTOMERS"),
            vec![
                Column::typed("CUSTOMER_ID", "NUMBER"),
                Column::typed("NAME", "VARCHAR"),
            ],
        )
}

fn session() -> Session {
    session_with(ChainConfig::default())
}

fn session_with(config: ChainConfig) -> Session {
    Session::new(Arc::new(warehouse()), config).unwrap()
}

fn cast_amount(session: &Session, root: &Chain) -> Chain {
    session
        .transform(
            root,
            "cast",
            Arguments::new().with("casts", ArgValue::mapping([("AMOUNT", "STRING")])),
        )
        .unwrap()
}

#[test]
fn test_cast_appends_column_end_to_end() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = cast_amount(&session, &root);

    let compiled = session.compile(&chain).unwrap();
    assert_eq!(
        compiled.columns.names(),
        vec!["ID", "AMOUNT", "DATE", "AMOUNT_STRING"]
    );
    assert_eq!(
        compiled.sql,
        "WITH STEP_1_CAST AS (\n\
         SELECT\n  ID,\n  AMOUNT,\n  DATE,\n  CAST(AMOUNT AS STRING) AS AMOUNT_STRING\nFROM DB.PUBLIC.ORDERS\n\
         )\n\
         SELECT ID, AMOUNT, DATE, AMOUNT_STRING\nFROM STEP_1_CAST"
    );
    assert_eq!(
        compiled.columns.get("AMOUNT_STRING").unwrap().data_type.as_deref(),
        Some("STRING")
    );
}

#[test]
fn test_cast_overwrite_keeps_column_set() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "cast",
            Arguments::new()
                .with("casts", ArgValue::mapping([("AMOUNT", "STRING")]))
                .with("overwrite_columns", true),
        )
        .unwrap();
    let fragment = chain.step().unwrap().fragment();
    assert_eq!(
        fragment,
        "SELECT\n  ID,\n  CAST(AMOUNT AS STRING) AS AMOUNT,\n  DATE\nFROM DB.PUBLIC.ORDERS"
    );
    assert_eq!(
        chain.declared_columns().unwrap().names(),
        vec!["ID", "AMOUNT", "DATE"]
    );
}

#[test]
fn test_exclusion_preserves_input_order() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.SALES").unwrap();
    let chain = session
        .transform(
            &root,
            "drop_columns",
            Arguments::new().with("exclude_cols", vec!["CUSTOMER_ID", "AMOUNT"]),
        )
        .unwrap();
    assert_eq!(chain.declared_columns().unwrap().names(), vec!["ID", "REGION"]);
}

#[test]
fn test_include_and_exclude_are_mutually_exclusive() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.SALES").unwrap();
    let err = session
        .transform(
            &root,
            "drop_columns",
            Arguments::new()
                .with("include_cols", vec!["ID"])
                .with("exclude_cols", vec!["REGION"]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::MutuallyExclusiveArguments { ref first, ref second, .. }
            if first == "include_cols" && second == "exclude_cols"
    ));
}

#[test]
fn test_synthesized_name_collision() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.SALES").unwrap();
    let err = session
        .transform(
            &root,
            "aggregate",
            Arguments::new()
                .with("group_by", vec!["REGION"])
                .with("aggregations", ArgValue::mapping([("AMOUNT", vec!["sum", "SUM"])])),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::DuplicateColumn { ref column, .. } if column == "AMOUNT_SUM"
    ));
}

#[test]
fn test_aggregate_declares_group_and_measure_columns() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.SALES").unwrap();
    let chain = session
        .transform(
            &root,
            "aggregate",
            Arguments::new()
                .with("group_by", vec!["REGION"])
                .with(
                    "aggregations",
                    ArgValue::mapping([("AMOUNT", vec!["sum", "avg"]), ("ID", vec!["count"])]),
                ),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  REGION,\n  SUM(AMOUNT) AS AMOUNT_SUM,\n  AVG(AMOUNT) AS AMOUNT_AVG,\n  COUNT(ID) AS ID_COUNT\nFROM DB.PUBLIC.SALES\nGROUP BY REGION"
    );
    assert_eq!(
        chain.declared_columns().unwrap().names(),
        vec!["REGION", "AMOUNT_SUM", "AMOUNT_AVG", "ID_COUNT"]
    );
}

#[test]
fn test_unknown_column_is_reported_with_its_name() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let err = session
        .transform(
            &root,
            "rename",
            Arguments::new().with("renames", ArgValue::mapping([("amount", "TOTAL")])),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::InvalidColumnReference { ref column, ref template, .. }
            if column == "amount" && template == "rename"
    ));
}

#[test]
fn test_branching_shares_prefix() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let base = cast_amount(&session, &root);

    let sorted = session
        .transform(
            &base,
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("DATE", "desc")])),
        )
        .unwrap();
    let trimmed = session
        .transform(
            &base,
            "drop_columns",
            Arguments::new().with("exclude_cols", vec!["AMOUNT"]),
        )
        .unwrap();

    let before = session.compile(&trimmed).unwrap();
    let sorted_sql = session.compile(&sorted).unwrap();
    let after = session.compile(&trimmed).unwrap();

    assert_eq!(before, after);
    assert!(sorted.parent().unwrap().ptr_eq(&base));
    assert!(trimmed.parent().unwrap().ptr_eq(&base));
    assert!(sorted_sql.sql.contains("STEP_2_ORDER AS ("));
    assert!(!sorted_sql.sql.contains("STEP_2_DROP_COLUMNS"));
    assert_eq!(after.columns.names(), vec!["ID", "DATE", "AMOUNT_STRING"]);
    assert_eq!(
        session.compile(&base).unwrap().columns.names(),
        vec!["ID", "AMOUNT", "DATE", "AMOUNT_STRING"]
    );
}

#[test]
fn test_join_with_compiled_chain() {
    let session = session();
    let customers = session.dataset("DB.PUBLIC.CUSTOMERS").unwrap();
    let named = session
        .transform(
            &customers,
            "filter",
            Arguments::new().with("filters", vec!["NAME IS NOT NULL"]),
        )
        .unwrap();
    let partner = session.as_dataset(&named).unwrap();

    let sales = session.dataset("DB.PUBLIC.SALES").unwrap();
    let joined = session
        .transform(
            &sales,
            "join",
            Arguments::new()
                .with("join_table", partner)
                .with("join_columns", ArgValue::mapping([("CUSTOMER_ID", "CUSTOMER_ID")]))
                .with("join_prefix", "CUST"),
        )
        .unwrap();

    let compiled = session.compile(&joined).unwrap();
    assert_eq!(
        compiled.columns.names(),
        vec!["ID", "CUSTOMER_ID", "REGION", "AMOUNT", "CUST_CUSTOMER_ID", "CUST_NAME"]
    );
    assert!(compiled
        .sql
        .contains("LEFT JOIN (\nWITH STEP_1_FILTER AS (\n"));
    assert!(compiled.sql.contains("  ON l.CUSTOMER_ID = r.CUSTOMER_ID"));
    assert!(compiled.sql.contains("WHERE\n  NAME IS NOT NULL"));
}

#[test]
fn test_join_table_by_partial_name() {
    let config = ChainConfig::from_yaml_str("default_namespace: DB.PUBLIC\n").unwrap();
    let session = session_with(config);
    let sales = session.dataset("SALES").unwrap();
    let joined = session
        .transform(
            &sales,
            "join",
            Arguments::new()
                .with("join_table", "CUSTOMERS")
                .with("join_columns", ArgValue::mapping([("CUSTOMER_ID", "CUSTOMER_ID")]))
                .with("join_type", "inner"),
        )
        .unwrap();
    let fragment = joined.step().unwrap().fragment();
    assert!(fragment.contains("INNER JOIN DB.PUBLIC.CUSTOMERS r"));
    assert!(fragment.contains("r.NAME AS CUSTOMERS_NAME"));
}

#[test]
fn test_join_checks_partner_columns() {
    let session = session();
    let sales = session.dataset("DB.PUBLIC.SALES").unwrap();
    let err = session
        .transform(
            &sales,
            "join",
            Arguments::new()
                .with("join_table", TableName::new("DB", "PUBLIC", "CUSTOMERS"))
                .with("join_columns", ArgValue::mapping([("CUSTOMER_ID", "ID")])),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::InvalidColumnReference { ref column, ref dataset, .. }
            if column == "ID" && dataset == "DB.PUBLIC.CUSTOMERS"
    ));
}

#[test]
fn test_nested_style_from_config() {
    let config = ChainConfig {
        compile_style: CompileStyle::Nested,
        ..ChainConfig::default()
    };
    let session = session_with(config);
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = cast_amount(&session, &root);
    let compiled = session.compile(&chain).unwrap();
    assert!(compiled.sql.starts_with("SELECT ID, AMOUNT, DATE, AMOUNT_STRING\nFROM (\nSELECT\n"));
    assert!(!compiled.sql.contains("WITH"));
}

#[test]
fn test_caller_aliases_name_the_ctes() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform_with(
            &root,
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("ID", "asc")])),
            StepOptions::alias("SORTED_ORDERS"),
        )
        .unwrap();
    let compiled = session.compile(&chain).unwrap();
    assert!(compiled.sql.starts_with("WITH SORTED_ORDERS AS ("));
    assert!(compiled.sql.ends_with("FROM SORTED_ORDERS"));
}

#[test]
fn test_pivot_and_custom_sql() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.SALES").unwrap();
    let pivoted = session
        .transform(
            &root,
            "pivot",
            Arguments::new()
                .with("dimensions", vec!["CUSTOMER_ID"])
                .with("pivot_column", "REGION")
                .with("value_column", "AMOUNT")
                .with("list_of_vals", vec!["EU", "US"]),
        )
        .unwrap();
    assert_eq!(
        pivoted.declared_columns().unwrap().names(),
        vec!["CUSTOMER_ID", "AMOUNT_EU", "AMOUNT_US"]
    );
    assert!(pivoted
        .step()
        .unwrap()
        .fragment()
        .contains("SUM(CASE WHEN REGION = 'EU' THEN AMOUNT END) AS AMOUNT_EU,"));

    let custom = session
        .transform(
            &pivoted,
            "apply",
            Arguments::new()
                .with(
                    "sql",
                    "SELECT CUSTOMER_ID, AMOUNT_EU + AMOUNT_US AS TOTAL FROM {{ source_table }}",
                )
                .with("output_columns", vec!["CUSTOMER_ID", "TOTAL"]),
        )
        .unwrap();
    let compiled = session.compile(&custom).unwrap();
    assert!(compiled
        .sql
        .contains("SELECT CUSTOMER_ID, AMOUNT_EU + AMOUNT_US AS TOTAL FROM STEP_1_PIVOT"));
    assert!(compiled.sql.ends_with("SELECT CUSTOMER_ID, TOTAL\nFROM STEP_2_APPLY"));
}

#[test]
fn test_filter_predicates_are_emitted_verbatim() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "filter",
            Arguments::new().with("filters", vec!["NOTE LIKE '%{#%'", "LABEL = '{{ x }}'"]),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT,\n  DATE\nFROM DB.PUBLIC.ORDERS\nWHERE\n  NOTE LIKE '%{#%'\n  AND LABEL = '{{ x }}'"
    );
}

#[test]
fn test_dateadd_overwrite_shifts_in_place() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "dateadd",
            Arguments::new()
                .with("date", "DATE")
                .with("offset", 1)
                .with("interval_type", "day")
                .with("overwrite_columns", true),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT,\n  DATEADD(day, 1, DATE) AS DATE\nFROM DB.PUBLIC.ORDERS"
    );
    assert_eq!(
        chain.declared_columns().unwrap().names(),
        vec!["ID", "AMOUNT", "DATE"]
    );
}

#[test]
fn test_dateadd_appends_named_column() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "dateadd",
            Arguments::new()
                .with("date", "DATE")
                .with("offset", -3)
                .with("interval_type", "day"),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT,\n  DATE,\n  DATEADD(day, -3, DATE) AS DATE_ADD_3DAY\nFROM DB.PUBLIC.ORDERS"
    );
    let columns = chain.declared_columns().unwrap();
    assert_eq!(columns.names(), vec!["ID", "AMOUNT", "DATE", "DATE_ADD_3DAY"]);
    assert_eq!(
        columns.get("DATE_ADD_3DAY").unwrap().data_type.as_deref(),
        Some("DATE")
    );
}

#[test]
fn test_concat_generated_and_explicit_alias() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let generated = session
        .transform(
            &root,
            "concat",
            Arguments::new().with("concat_list", vec!["ID", "AMOUNT"]),
        )
        .unwrap();
    assert_eq!(
        generated.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT,\n  DATE,\n  CONCAT(ID, AMOUNT) AS CONCAT_ID_AMOUNT\nFROM DB.PUBLIC.ORDERS"
    );
    assert_eq!(
        generated.declared_columns().unwrap().names(),
        vec!["ID", "AMOUNT", "DATE", "CONCAT_ID_AMOUNT"]
    );

    let named = session
        .transform(
            &root,
            "concat",
            Arguments::new()
                .with("concat_list", vec!["ID", "'-'", "AMOUNT"])
                .with("alias", "LABEL"),
        )
        .unwrap();
    assert!(named
        .step()
        .unwrap()
        .fragment()
        .contains("  CONCAT(ID, '-', AMOUNT) AS LABEL\nFROM DB.PUBLIC.ORDERS"));
    let columns = named.declared_columns().unwrap();
    assert_eq!(columns.names(), vec!["ID", "AMOUNT", "DATE", "LABEL"]);
    assert_eq!(columns.get("LABEL").unwrap().data_type.as_deref(), Some("STRING"));
}

#[test]
fn test_datetrunc_appends_truncated_column() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "datetrunc",
            Arguments::new().with("dates", ArgValue::mapping([("DATE", "month")])),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT,\n  DATE,\n  DATE_TRUNC('month', DATE) AS DATE_MONTH\nFROM DB.PUBLIC.ORDERS"
    );
    assert_eq!(
        chain.declared_columns().unwrap().names(),
        vec!["ID", "AMOUNT", "DATE", "DATE_MONTH"]
    );
}

#[test]
fn test_rename_keeps_position_and_type() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &root,
            "rename",
            Arguments::new().with("renames", ArgValue::mapping([("AMOUNT", "TOTAL")])),
        )
        .unwrap();
    assert_eq!(
        chain.step().unwrap().fragment(),
        "SELECT\n  ID,\n  AMOUNT AS TOTAL,\n  DATE\nFROM DB.PUBLIC.ORDERS"
    );
    let columns = chain.declared_columns().unwrap();
    assert_eq!(columns.names(), vec!["ID", "TOTAL", "DATE"]);
    assert_eq!(columns.get("TOTAL").unwrap().data_type.as_deref(), Some("NUMBER"));
}

#[test]
fn test_case_variant_alias_is_rejected() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let sorted = session
        .transform(
            &root,
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("ID", "asc")])),
        )
        .unwrap();
    let err = session
        .transform_with(
            &sorted,
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("ID", "desc")])),
            StepOptions::alias("step_1_order"),
        )
        .unwrap_err();
    assert!(matches!(err, ChainError::AliasConflict { .. }));

    let err = session
        .transform_with(
            &root,
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("ID", "asc")])),
            StepOptions::alias("my step"),
        )
        .unwrap_err();
    assert!(matches!(err, ChainError::InvalidAlias { ref alias } if alias == "my step"));
}

#[test]
fn test_shared_chain_compiles_concurrently() {
    let session = session();
    let root = session.dataset("DB.PUBLIC.ORDERS").unwrap();
    let chain = session
        .transform(
            &cast_amount(&session, &root),
            "order",
            Arguments::new().with("order_by", ArgValue::mapping([("ID", "asc")])),
        )
        .unwrap();
    let expected = session.compile(&chain).unwrap().sql;

    let results: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| session.compile(&chain).unwrap().sql))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|sql| *sql == expected));
}

proptest! {
    #[test]
    fn test_compilation_is_deterministic(
        steps in prop::collection::vec(0usize..4, 1..6),
        nested in any::<bool>(),
    ) {
        let session = session();
        let mut chain = session.dataset("DB.PUBLIC.ORDERS").unwrap();
        for step in steps {
            let (name, args) = match step {
                0 => ("order", Arguments::new().with("order_by", ArgValue::mapping([("ID", "asc")]))),
                1 => ("filter", Arguments::new().with("filters", vec!["AMOUNT > 0"])),
                2 => ("datetrunc", Arguments::new()
                    .with("dates", ArgValue::mapping([("DATE", "month")]))
                    .with("overwrite_columns", true)),
                _ => ("rename", Arguments::new().with("renames", ArgValue::mapping([("ID", "ID")]))),
            };
            chain = session.transform(&chain, name, args).unwrap();
        }
        let style = if nested { CompileStyle::Nested } else { CompileStyle::Cte };
        let first = session.composer().compile_with(&chain, style).unwrap();
        let second = session.composer().compile_with(&chain, style).unwrap();
        prop_assert_eq!(&first.sql, &second.sql);
        prop_assert_eq!(first.columns.names(), vec!["ID", "AMOUNT", "DATE"]);
    }
}
