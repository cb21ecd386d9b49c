//! End-to-end tests: configuration loading, reference partition loading,
//! and full pipeline runs against temporary SQLite databases.

mod config_tests {
    use starling::config::{CompressionFormat, Config, MalformedPolicy};
    use starling::error::ConfigError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_config(temp_dir: &TempDir, yaml: &str) -> PathBuf {
        let path = temp_dir.path().join("starling.yaml");
        std::fs::write(&path, yaml).expect("Failed to write config file");
        path
    }

    #[test]
    fn test_full_config_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
reference:
  database: /data/reference.db
  customer_partition: customers_master
  product_partition: products_master

transactions:
  path: /data/transactions.csv.gz
  compression: gzip
  has_header: false
  on_malformed: fail
  enrich_workers: 4

sink:
  database: /data/warehouse.db
  fact_table: fact_sales
  batch_size: 250
  flush_retries: 2
  create_table: false

metrics:
  enabled: false
  address: 127.0.0.1:9187

error_handling:
  max_skipped: 10
  dlq_path: /var/log/starling/dlq
"#,
        );

        let config = Config::from_file(&path).expect("Config should parse");
        assert_eq!(config.reference.database, "/data/reference.db");
        assert_eq!(config.reference.customer_partition, "customers_master");
        assert_eq!(config.reference.product_partition, "products_master");
        assert_eq!(config.transactions.path, "/data/transactions.csv.gz");
        assert_eq!(config.transactions.compression, CompressionFormat::Gzip);
        assert!(!config.transactions.has_header);
        assert_eq!(config.transactions.on_malformed, MalformedPolicy::Fail);
        assert_eq!(config.transactions.enrich_workers, 4);
        assert_eq!(config.sink.database, "/data/warehouse.db");
        assert_eq!(config.sink.fact_table, "fact_sales");
        assert_eq!(config.sink.batch_size, 250);
        assert_eq!(config.sink.flush_retries, 2);
        assert!(!config.sink.create_table);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:9187");
        assert_eq!(config.error_handling.max_skipped, 10);
        assert_eq!(
            config.error_handling.dlq_path,
            Some("/var/log/starling/dlq".to_string())
        );
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
reference:
  database: /data/reference.db

transactions:
  path: /data/transactions.csv

sink:
  database: /data/warehouse.db
"#,
        );

        let config = Config::from_file(&path).expect("Config should parse");
        assert_eq!(config.reference.customer_partition, "customers");
        assert_eq!(config.reference.product_partition, "products");
        assert_eq!(config.transactions.compression, CompressionFormat::None);
        assert!(config.transactions.has_header);
        assert_eq!(config.transactions.on_malformed, MalformedPolicy::Skip);
        assert_eq!(config.transactions.enrich_workers, 1);
        assert_eq!(config.sink.fact_table, "star_schema_transactions");
        assert_eq!(config.sink.batch_size, 1000);
        assert_eq!(config.sink.flush_retries, 0);
        assert!(config.sink.create_table);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
        assert_eq!(config.error_handling.max_skipped, 0);
        assert!(config.error_handling.dlq_path.is_none());
    }

    #[test]
    fn test_env_default_interpolates_when_unset() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
reference:
  database: /data/reference.db

transactions:
  path: /data/transactions.csv

sink:
  database: /data/warehouse.db
  batch_size: ${STARLING_ITEST_UNSET_BATCH:-250}
"#,
        );

        let config = Config::from_file(&path).expect("Config should parse");
        assert_eq!(config.sink.batch_size, 250);
    }

    #[test]
    fn test_missing_env_variable_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
reference:
  database: /data/reference.db

transactions:
  path: $STARLING_ITEST_NEVER_SET

sink:
  database: /data/warehouse.db
"#,
        );

        let err = Config::from_file(&path).expect_err("Unset variable should fail");
        match err {
            ConfigError::EnvInterpolation { message } => {
                assert!(message.contains("STARLING_ITEST_NEVER_SET"));
            }
            other => panic!("expected EnvInterpolation, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
reference:
  database: /data/reference.db

transactions:
  path: /data/transactions.csv

sink:
  database: /data/warehouse.db
  batch_size: 0
"#,
        );

        let err = Config::from_file(&path).expect_err("Zero batch size should fail");
        assert!(matches!(err, ConfigError::ZeroBatchSize));
    }
}

mod reference_tests {
    use rusqlite::Connection;
    use starling::error::ReferenceError;
    use starling::reference::{
        CustomerRecord, ProductRecord, SqliteReferenceStore, load_partition,
    };
    use tempfile::TempDir;

    fn seeded_db(temp_dir: &TempDir, schema: &str) -> String {
        let path = temp_dir.path().join("reference.db");
        let conn = Connection::open(&path).expect("Failed to create reference db");
        conn.execute_batch(schema).expect("Failed to seed reference db");
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_loads_typed_partitions_from_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let path = seeded_db(
            &temp_dir,
            "CREATE TABLE customers (customer_id TEXT, customer_name TEXT, gender TEXT);
             CREATE TABLE products (
                 productID TEXT, productName TEXT, productPrice TEXT,
                 supplierName TEXT, supplierID TEXT, storeID TEXT, storeName TEXT
             );
             INSERT INTO customers VALUES ('C1', 'Alice', 'F');
             INSERT INTO customers VALUES ('C2', 'Bob', NULL);
             INSERT INTO products VALUES
                 ('P1', 'Widget', '9.99', 'Acme Supply', 'S1', 'ST1', 'Main Street');",
        );

        let store = SqliteReferenceStore::open(&path).expect("Store should open");
        let customers = load_partition::<CustomerRecord>(&store, "customers").unwrap();
        let products = load_partition::<ProductRecord>(&store, "products").unwrap();

        assert_eq!(customers.len(), 2);
        let alice = customers.get("C1").expect("C1 should be indexed");
        assert_eq!(alice.customer_name.as_deref(), Some("Alice"));
        assert_eq!(alice.gender.as_deref(), Some("F"));
        assert!(customers.get("C2").unwrap().gender.is_none());
        assert!(customers.get("C9").is_none());

        assert_eq!(products.len(), 1);
        let widget = products.get("P1").expect("P1 should be indexed");
        assert_eq!(widget.product_name.as_deref(), Some("Widget"));
        // Price stays a verbatim string until derivation
        assert_eq!(widget.product_price.as_deref(), Some("9.99"));
        assert_eq!(widget.supplier_name.as_deref(), Some("Acme Supply"));
        assert_eq!(widget.supplier_id.as_deref(), Some("S1"));
        assert_eq!(widget.store_id.as_deref(), Some("ST1"));
        assert_eq!(widget.store_name.as_deref(), Some("Main Street"));
    }

    #[test]
    fn test_first_record_wins_for_duplicate_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = seeded_db(
            &temp_dir,
            "CREATE TABLE customers (customer_id TEXT, customer_name TEXT, gender TEXT);
             INSERT INTO customers VALUES ('C1', 'Alice', 'F');
             INSERT INTO customers VALUES ('C1', 'Impostor', 'M');
             INSERT INTO customers VALUES ('C2', 'Bob', 'M');",
        );

        let store = SqliteReferenceStore::open(&path).expect("Store should open");
        let customers = load_partition::<CustomerRecord>(&store, "customers").unwrap();

        assert_eq!(customers.len(), 2);
        assert_eq!(customers.duplicate_keys(), 1);
        assert_eq!(
            customers.get("C1").unwrap().customer_name.as_deref(),
            Some("Alice")
        );
    }

    #[test]
    fn test_missing_key_column_is_schema_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = seeded_db(
            &temp_dir,
            "CREATE TABLE customers (id TEXT, customer_name TEXT, gender TEXT);
             INSERT INTO customers VALUES ('C1', 'Alice', 'F');",
        );

        let store = SqliteReferenceStore::open(&path).expect("Store should open");
        let err = load_partition::<CustomerRecord>(&store, "customers").unwrap_err();
        match err {
            ReferenceError::SchemaMismatch { partition, column } => {
                assert_eq!(partition, "customers");
                assert_eq!(column, "customer_id");
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }
}

mod pipeline_tests {
    use rusqlite::Connection;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use starling::config::{
        CompressionFormat, Config, ErrorHandlingConfig, MalformedPolicy, MetricsConfig,
        ReferenceConfig, SinkConfig, TransactionConfig,
    };
    use starling::error::{EnrichError, PipelineError, StreamError};
    use starling::sink::FACT_COLUMNS;
    use starling::{Pipeline, run_pipeline};

    fn path_str(temp_dir: &TempDir, name: &str) -> String {
        temp_dir.path().join(name).to_str().unwrap().to_string()
    }

    fn seed_reference(temp_dir: &TempDir) {
        let conn = Connection::open(temp_dir.path().join("reference.db"))
            .expect("Failed to create reference db");
        conn.execute_batch(
            "CREATE TABLE customers (customer_id TEXT, customer_name TEXT, gender TEXT);
             CREATE TABLE products (
                 productID TEXT, productName TEXT, productPrice TEXT,
                 supplierName TEXT, supplierID TEXT, storeID TEXT, storeName TEXT
             );
             INSERT INTO customers VALUES ('C1', 'Alice', 'F');
             INSERT INTO customers VALUES ('C2', 'Bob', 'M');
             INSERT INTO products VALUES
                 ('P1', 'Widget', '9.99', 'Acme Supply', 'S1', 'ST1', 'Main Street');
             INSERT INTO products VALUES
                 ('P2', 'Gadget', '2.50', 'Globex', 'S2', 'ST2', 'Harborside');",
        )
        .expect("Failed to seed reference db");
    }

    fn write_transactions(path: &Path, rows: &[&str]) {
        let mut file = std::fs::File::create(path).expect("Failed to create transactions file");
        writeln!(file, "OrderID,OrderDate,ProductID,QuantityOrdered,CustomerID,TimeID").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
    }

    fn config(temp_dir: &TempDir) -> Config {
        Config {
            reference: ReferenceConfig {
                database: path_str(temp_dir, "reference.db"),
                customer_partition: "customers".to_string(),
                product_partition: "products".to_string(),
            },
            transactions: TransactionConfig {
                path: path_str(temp_dir, "transactions.csv"),
                compression: CompressionFormat::None,
                has_header: true,
                on_malformed: MalformedPolicy::Skip,
                enrich_workers: 1,
            },
            sink: SinkConfig {
                database: path_str(temp_dir, "warehouse.db"),
                fact_table: "star_schema_transactions".to_string(),
                batch_size: 1000,
                flush_retries: 0,
                create_table: true,
            },
            metrics: MetricsConfig {
                enabled: false,
                address: "127.0.0.1:9090".to_string(),
            },
            error_handling: ErrorHandlingConfig::default(),
        }
    }

    fn fact_count(database: &str) -> i64 {
        let conn = Connection::open(database).expect("Failed to open warehouse db");
        conn.query_row("SELECT COUNT(*) FROM star_schema_transactions", [], |row| {
            row.get(0)
        })
        .expect("Fact table should exist")
    }

    #[tokio::test]
    async fn test_enriches_and_writes_matched_transactions() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &["O1,2024-03-01,P1,3,C1,T1"],
        );

        let config = config(&temp_dir);
        let database = config.sink.database.clone();
        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.records_read, 1);
        assert_eq!(stats.records_enriched, 1);
        assert_eq!(stats.records_skipped, 0);
        assert_eq!(stats.customer_misses, 0);
        assert_eq!(stats.product_misses, 0);
        assert_eq!(stats.duplicate_keys, 0);
        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.batches_flushed, 1);
        assert!(!stats.interrupted);

        let conn = Connection::open(&database).unwrap();

        // The fact table carries exactly the documented columns, in order
        let stmt = conn.prepare("SELECT * FROM star_schema_transactions").unwrap();
        assert_eq!(stmt.column_names(), FACT_COLUMNS);
        drop(stmt);

        let row = conn
            .query_row(
                "SELECT Order_ID, Order_Date, Quantity_Ordered, customer_name, gender,
                        productName, productPrice, supplierName, storeID, storeName,
                        supplierID, TotalSales
                 FROM star_schema_transactions",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, f64>(11)?,
                    ))
                },
            )
            .expect("Fact row should exist");

        assert_eq!(row.0, "O1");
        assert_eq!(row.1, "2024-03-01");
        assert_eq!(row.2, "3");
        assert_eq!(row.3, "Alice");
        assert_eq!(row.4, "F");
        assert_eq!(row.5, "Widget");
        assert_eq!(row.6, "9.99");
        assert_eq!(row.7, "Acme Supply");
        assert_eq!(row.8, "ST1");
        assert_eq!(row.9, "Main Street");
        assert_eq!(row.10, "S1");
        assert!((row.11 - 29.97).abs() < 1e-9, "TotalSales should be 3 * 9.99");
    }

    #[tokio::test]
    async fn test_unmatched_keys_pass_through_with_nulls() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &["O1,2024-03-01,P9,2,C9,T1"],
        );

        let config = config(&temp_dir);
        let database = config.sink.database.clone();
        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.records_written, 1, "Unmatched records still land");
        assert_eq!(stats.customer_misses, 1);
        assert_eq!(stats.product_misses, 1);

        let conn = Connection::open(&database).unwrap();
        let row = conn
            .query_row(
                "SELECT Order_ID, Quantity_Ordered,
                        customer_name IS NULL, gender IS NULL,
                        productName IS NULL, TotalSales IS NULL
                 FROM star_schema_transactions",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .unwrap();

        // Transaction fields carry through verbatim, dimension fields go NULL
        assert_eq!(row.0, "O1");
        assert_eq!(row.1, "2");
        assert!(row.2 && row.3 && row.4 && row.5);
    }

    #[tokio::test]
    async fn test_duplicate_reference_keys_surface_in_stats() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        {
            let conn = Connection::open(temp_dir.path().join("reference.db")).unwrap();
            // Same key as the seeded Alice row; the load keeps hers
            conn.execute("INSERT INTO customers VALUES ('C1', 'Impostor', 'M')", [])
                .unwrap();
        }
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &["O1,2024-03-01,P1,3,C1,T1"],
        );

        let config = config(&temp_dir);
        let database = config.sink.database.clone();
        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.duplicate_keys, 1);

        let conn = Connection::open(&database).unwrap();
        let name: String = conn
            .query_row(
                "SELECT customer_name FROM star_schema_transactions",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Alice", "First-listed record wins the key");
    }

    #[tokio::test]
    async fn test_flushes_in_configured_batches() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &[
                "O1,2024-03-01,P1,1,C1,T1",
                "O2,2024-03-01,P1,2,C1,T1",
                "O3,2024-03-01,P2,3,C2,T2",
                "O4,2024-03-02,P2,4,C2,T2",
                "O5,2024-03-02,P1,5,C1,T3",
            ],
        );

        let mut config = config(&temp_dir);
        config.sink.batch_size = 2;
        let database = config.sink.database.clone();
        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.records_written, 5);
        // Two full batches plus the tail of one
        assert_eq!(stats.batches_flushed, 3);
        assert_eq!(fact_count(&database), 5);
    }

    #[tokio::test]
    async fn test_empty_source_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(&temp_dir.path().join("transactions.csv"), &[]);

        let config = config(&temp_dir);
        let database = config.sink.database.clone();
        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.records_read, 0);
        assert_eq!(stats.records_written, 0);
        assert_eq!(stats.batches_flushed, 0);
        assert_eq!(fact_count(&database), 0, "Table exists but stays empty");
    }

    #[tokio::test]
    async fn test_skip_policy_quarantines_malformed_records() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &[
                "O1,2024-03-01,P1,3,C1,T1",
                "O2,2024-03-01,P1",
                "O3,2024-03-01,P1,three,C1,T3",
                "O4,2024-03-02,P2,4,C2,T4",
            ],
        );

        let mut config = config(&temp_dir);
        let dlq_path = path_str(&temp_dir, "dlq");
        config.error_handling.dlq_path = Some(dlq_path.clone());
        let transactions_path = config.transactions.path.clone();
        let database = config.sink.database.clone();

        let stats = run_pipeline(config).await.expect("Pipeline should succeed");

        assert_eq!(stats.records_read, 2, "Only well-formed records count as read");
        assert_eq!(stats.records_skipped, 2);
        assert_eq!(stats.records_written, 2);
        assert_eq!(fact_count(&database), 2);

        let conn = Connection::open(&database).unwrap();
        let mut stmt = conn
            .prepare("SELECT Order_ID FROM star_schema_transactions ORDER BY Order_ID")
            .unwrap();
        let written: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(written, vec!["O1".to_string(), "O4".to_string()]);

        // Both rejects land in one per-run NDJSON file
        let entries: Vec<_> = std::fs::read_dir(&dlq_path)
            .expect("DLQ directory should exist")
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "ndjson")
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(entries.len(), 1, "Should have exactly one NDJSON file");
        let file_name = entries[0].file_name().to_str().unwrap().to_string();
        assert!(file_name.starts_with("rejected-"));

        let content = std::fs::read_to_string(entries[0].path()).expect("Failed to read DLQ file");
        let records: Vec<starling::dlq::RejectedRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("Each line should be valid JSON"))
            .collect();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].path, transactions_path);
        assert_eq!(records[0].line, 3);
        assert!(records[0].reason.contains("expected 6 fields, found 3"));
        assert_eq!(records[1].line, 4);
        assert!(records[1].reason.contains("'three' is not numeric"));
    }

    #[tokio::test]
    async fn test_fail_policy_aborts_on_first_malformed_record() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &[
                "O1,2024-03-01,P1,3,C1,T1",
                "O2,2024-03-01,P1",
                "O3,2024-03-02,P2,4,C2,T3",
            ],
        );

        let mut config = config(&temp_dir);
        config.transactions.on_malformed = MalformedPolicy::Fail;
        let database = config.sink.database.clone();

        let err = run_pipeline(config).await.expect_err("Pipeline should abort");
        match err {
            PipelineError::Stream {
                source: StreamError::MalformedRecord { line, .. },
            } => assert_eq!(line, 3),
            other => panic!("expected MalformedRecord, got {other:?}"),
        }

        // O1 was buffered but never flushed; the abort discards it
        assert_eq!(fact_count(&database), 0);
    }

    #[tokio::test]
    async fn test_unparseable_price_on_matched_product_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        let conn = Connection::open(temp_dir.path().join("reference.db")).unwrap();
        conn.execute(
            "INSERT INTO products VALUES ('P3', 'Mystery', 'free', 'Acme Supply', 'S1', 'ST1', NULL)",
            [],
        )
        .unwrap();
        drop(conn);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &["O1,2024-03-01,P3,2,C1,T1"],
        );

        let err = run_pipeline(config(&temp_dir))
            .await
            .expect_err("Bad price should abort");
        match err {
            PipelineError::Enrich {
                source:
                    EnrichError::NumericParse {
                        order_id,
                        field,
                        value,
                        ..
                    },
            } => {
                assert_eq!(order_id, "O1");
                assert_eq!(field, "productPrice");
                assert_eq!(value, "free");
            }
            other => panic!("expected NumericParse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skip_budget_aborts_the_run() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &[
                "O1,2024-03-01,P1",
                "O2,2024-03-01,P1,zz,C1,T2",
                "O3,2024-03-02,P2,4,C2,T3",
            ],
        );

        let mut config = config(&temp_dir);
        config.error_handling.max_skipped = 2;
        let database = config.sink.database.clone();

        let err = run_pipeline(config).await.expect_err("Budget should trip");
        match err {
            PipelineError::MaxSkippedExceeded { count } => assert_eq!(count, 2),
            other => panic!("expected MaxSkippedExceeded, got {other:?}"),
        }
        assert_eq!(fact_count(&database), 0);
    }

    #[tokio::test]
    async fn test_gzip_compressed_source() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);

        let path = temp_dir.path().join("transactions.csv.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(
                b"OrderID,OrderDate,ProductID,QuantityOrdered,CustomerID,TimeID\n\
                  O1,2024-03-01,P1,3,C1,T1\n\
                  O2,2024-03-01,P2,1,C2,T1\n",
            )
            .unwrap();
        encoder.finish().unwrap();

        let mut config = config(&temp_dir);
        config.transactions.path = path.to_str().unwrap().to_string();
        config.transactions.compression = CompressionFormat::Gzip;
        let database = config.sink.database.clone();

        let stats = run_pipeline(config).await.expect("Pipeline should succeed");
        assert_eq!(stats.records_written, 2);
        assert_eq!(fact_count(&database), 2);
    }

    #[tokio::test]
    async fn test_repeated_runs_append_to_the_fact_table() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &["O1,2024-03-01,P1,3,C1,T1"],
        );

        let database = config(&temp_dir).sink.database.clone();
        run_pipeline(config(&temp_dir)).await.expect("First run should succeed");
        run_pipeline(config(&temp_dir)).await.expect("Second run should succeed");

        assert_eq!(fact_count(&database), 2, "Runs append, never truncate");
    }

    #[tokio::test]
    async fn test_parallel_enrichment_matches_serial_output() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);

        let mut rows = Vec::new();
        let mut expected_total = 0.0f64;
        for i in 0..40 {
            let quantity = i % 5 + 1;
            let (product, price) = match i % 3 {
                0 => ("P1", Some(9.99)),
                1 => ("P2", Some(2.50)),
                _ => ("P9", None),
            };
            let customer = if i % 4 == 0 { "C9" } else { "C1" };
            if let Some(price) = price {
                expected_total += price * quantity as f64;
            }
            rows.push(format!("O{i:02},2024-03-01,{product},{quantity},{customer},T{i}"));
        }
        let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        write_transactions(&temp_dir.path().join("transactions.csv"), &row_refs);

        let mut serial = config(&temp_dir);
        serial.sink.database = path_str(&temp_dir, "warehouse_serial.db");
        serial.sink.batch_size = 7;
        let serial_db = serial.sink.database.clone();

        let mut parallel = config(&temp_dir);
        parallel.sink.database = path_str(&temp_dir, "warehouse_parallel.db");
        parallel.sink.batch_size = 7;
        parallel.transactions.enrich_workers = 4;
        let parallel_db = parallel.sink.database.clone();

        let serial_stats = run_pipeline(serial).await.expect("Serial run should succeed");
        let parallel_stats = run_pipeline(parallel)
            .await
            .expect("Parallel run should succeed");

        assert_eq!(serial_stats.records_read, 40);
        assert_eq!(parallel_stats.records_read, 40);
        assert_eq!(serial_stats.records_enriched, parallel_stats.records_enriched);
        assert_eq!(serial_stats.customer_misses, parallel_stats.customer_misses);
        assert_eq!(serial_stats.product_misses, parallel_stats.product_misses);
        assert_eq!(serial_stats.records_written, parallel_stats.records_written);
        assert_eq!(serial_stats.batches_flushed, parallel_stats.batches_flushed);
        assert_eq!(serial_stats.product_misses, 13);
        assert_eq!(serial_stats.customer_misses, 10);

        for database in [&serial_db, &parallel_db] {
            let conn = Connection::open(database).unwrap();
            let (count, nulls, total): (i64, i64, f64) = conn
                .query_row(
                    "SELECT COUNT(*),
                            SUM(TotalSales IS NULL),
                            COALESCE(SUM(TotalSales), 0.0)
                     FROM star_schema_transactions",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .unwrap();
            assert_eq!(count, 40);
            assert_eq!(nulls, 13);
            assert!(
                (total - expected_total).abs() < 1e-6,
                "TotalSales sum should match regardless of worker count"
            );
        }
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_reading() {
        let temp_dir = TempDir::new().unwrap();
        seed_reference(&temp_dir);
        write_transactions(
            &temp_dir.path().join("transactions.csv"),
            &[
                "O1,2024-03-01,P1,3,C1,T1",
                "O2,2024-03-01,P2,1,C2,T2",
            ],
        );

        let config = config(&temp_dir);
        let database = config.sink.database.clone();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = Pipeline::new(config, shutdown)
            .run()
            .await
            .expect("Interrupted run still finishes cleanly");

        assert!(stats.interrupted);
        assert_eq!(stats.records_read, 0);
        assert_eq!(fact_count(&database), 0);
    }
}
