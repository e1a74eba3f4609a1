use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use pgsession::codec::WireParam;
use pgsession::drivers::{
    InMemoryTestResponseBuilder, InMemoryTestTransport, RecordedCall, RecordedParam, TestResponse,
};
use pgsession::types::oid;
use pgsession::{
    ConnectionState, PgResult, PgSessionError, Response, Session, SessionConfig, SqlValue,
    Transport, Value,
};

fn session_with(transport: &InMemoryTestTransport) -> Session {
    Session::with_transport(Box::new(transport.clone()), SessionConfig::default())
}

fn numbers(count: usize) -> TestResponse {
    let mut builder = InMemoryTestResponseBuilder::new().columns(&["n"]);
    for i in 1..=count {
        builder = builder.row(&[&i.to_string()]);
    }
    builder.build()
}

#[tokio::test]
async fn test_query_sends_text_parameters() {
    let transport = InMemoryTestTransport::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(&["id", "name"])
            .row(&["42", "Bob"])
            .build(),
    );
    let session = session_with(&transport);

    let result = session
        .query(
            "SELECT id, name FROM users WHERE name = $1 AND active = $2",
            [SqlValue::from("Bob"), SqlValue::from(true)],
        )
        .await
        .unwrap();

    transport.assert_last_query(
        "SELECT id, name FROM users WHERE name = $1 AND active = $2",
        &[RecordedParam::text("Bob"), RecordedParam::text("true")],
    );
    transport.assert_call_count(1);

    assert_eq!(result.columns(), &["id".to_string(), "name".to_string()]);
    let row = result.single_row().unwrap();
    assert_eq!(row.get::<i32>("id").unwrap(), 42);
    assert_eq!(row.get::<String>("name").unwrap(), "Bob");
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(transport.is_idle());
}

#[tokio::test]
async fn test_binary_parameters_and_nulls() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);

    session
        .execute(
            "INSERT INTO blobs(data, note) VALUES ($1, $2)",
            [SqlValue::from(vec![0u8, 1, 2]), SqlValue::from(None::<String>)],
        )
        .await
        .unwrap();

    transport.assert_last_query(
        "INSERT INTO blobs(data, note) VALUES ($1, $2)",
        &[RecordedParam::binary(&[0, 1, 2]), RecordedParam::null()],
    );
}

#[tokio::test]
async fn test_binary_columns_are_decoded() {
    let numeric = {
        // 12345.1234567
        let mut raw = Vec::new();
        for v in [4u16, 1, 0x0000, 7, 1, 2345, 1234, 5670] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        raw
    };
    let transport = InMemoryTestTransport::new().with_response(
        InMemoryTestResponseBuilder::new()
            .binary_column("id", oid::INT8)
            .binary_column("price", oid::NUMERIC)
            .binary_column("active", oid::BOOL)
            .binary_column("created", oid::TIMESTAMPTZ)
            .binary_column("ratio", oid::FLOAT8)
            .binary_column("note", oid::TEXT)
            .raw_row(vec![
                Some(Bytes::copy_from_slice(&7i64.to_be_bytes())),
                Some(Bytes::from(numeric)),
                Some(Bytes::from_static(&[1])),
                Some(Bytes::copy_from_slice(&0i64.to_be_bytes())),
                Some(Bytes::copy_from_slice(&0.25f64.to_bits().to_be_bytes())),
                None,
            ])
            .build(),
    );
    let session = session_with(&transport);

    let row = session
        .query("SELECT * FROM products", ())
        .await
        .unwrap()
        .single_row()
        .unwrap();

    assert_eq!(row.get::<i64>("id").unwrap(), 7);
    assert_eq!(
        row.value("price").unwrap(),
        &Value::Numeric("12345.1234567".to_string())
    );
    assert!(row.get::<bool>("active").unwrap());
    assert_eq!(
        row.get::<DateTime<Utc>>("created").unwrap(),
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    );
    assert_eq!(row.get::<f64>("ratio").unwrap(), 0.25);
    assert_eq!(row.get::<Option<String>>("note").unwrap(), None);
}

#[tokio::test]
async fn test_decode_failure_returns_to_idle() {
    let transport = InMemoryTestTransport::new().with_response(
        InMemoryTestResponseBuilder::new()
            .binary_column("id", oid::INT4)
            .raw_row(vec![Some(Bytes::from_static(&[0, 1]))])
            .raw_row(vec![Some(Bytes::from_static(&[0, 0, 0, 2]))])
            .build(),
    );
    let session = session_with(&transport);

    let err = session.execute("SELECT id FROM t", ()).await.unwrap_err();
    assert!(matches!(err, PgSessionError::DataConversion(_)));
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(transport.is_idle());
}

#[tokio::test]
async fn test_command_reports_rows_affected() {
    let transport = InMemoryTestTransport::new().with_response(
        InMemoryTestResponseBuilder::new().rows_affected(3).build(),
    );
    let session = session_with(&transport);

    match session.execute("DELETE FROM users", ()).await.unwrap() {
        Response::Complete { rows_affected } => assert_eq!(rows_affected, 3),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_annotated_with_query() {
    let transport = InMemoryTestTransport::new()
        .with_response(
            InMemoryTestResponseBuilder::new()
                .error("ERROR:  relation \"nope\" does not exist\n")
                .build(),
        )
        .with_response(numbers(1));
    let session = session_with(&transport);

    match session.execute("SELECT * FROM nope", ()).await.unwrap_err() {
        PgSessionError::Database { message, query } => {
            assert_eq!(message, "ERROR:  relation \"nope\" does not exist");
            assert_eq!(query, "SELECT * FROM nope");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(transport.is_idle());

    // The session is usable afterwards.
    assert_eq!(session.query("SELECT 1", ()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_after_some_rows_ends_stream() {
    let transport = InMemoryTestTransport::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(&["n"])
            .row(&["1"])
            .row(&["2"])
            .error("ERROR:  division by zero")
            .build(),
    );
    let session = session_with(&transport);

    let mut stream = session
        .execute("SELECT 1 / (2 - n) FROM t", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    assert!(stream.next().await.unwrap().is_some());
    assert!(stream.next().await.unwrap().is_some());
    assert!(matches!(
        stream.next().await,
        Err(PgSessionError::Database { .. })
    ));
    assert!(!stream.has_more());
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(transport.is_idle());
}

#[tokio::test]
async fn test_insert_six_rows_then_select_all() {
    let table: Arc<Mutex<Vec<Vec<Option<Bytes>>>>> = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&table);
    let transport = InMemoryTestTransport::new().with_handler(move |call| match call {
        RecordedCall::Query { sql, params } if sql.starts_with("INSERT") => {
            store.lock().unwrap().push(
                params
                    .iter()
                    .map(|p| p.value.clone().map(Bytes::from))
                    .collect(),
            );
            InMemoryTestResponseBuilder::new().rows_affected(1).build()
        }
        RecordedCall::Query { sql, .. } if sql.starts_with("SELECT") => {
            let mut builder = InMemoryTestResponseBuilder::new().columns(&["id", "name"]);
            for row in store.lock().unwrap().iter() {
                builder = builder.raw_row(row.clone());
            }
            builder.build()
        }
        _ => TestResponse::default(),
    });
    let session = session_with(&transport);

    let names = ["ann", "bob", "cy", "dee", "eve", "fay"];
    for (i, name) in names.iter().enumerate() {
        let response = session
            .execute(
                "INSERT INTO people(id, name) VALUES ($1, $2)",
                [SqlValue::from(i as i32 + 1), SqlValue::from(*name)],
            )
            .await
            .unwrap();
        assert!(matches!(response, Response::Complete { rows_affected: 1 }));
    }

    let result = session
        .query("SELECT id, name FROM people ORDER BY id", ())
        .await
        .unwrap();
    assert_eq!(result.len(), 6);
    assert_eq!(result.rows_affected(), 6);
    for (i, row) in result.rows_ref().iter().enumerate() {
        assert_eq!(row.get::<i32>("id").unwrap(), i as i32 + 1);
        assert_eq!(row.get::<String>("name").unwrap(), names[i]);
    }
    assert_eq!(table.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn test_abandoned_stream_does_not_block_next_query() {
    let transport = InMemoryTestTransport::new()
        .with_response(numbers(6))
        .with_response(numbers(2));
    let session = session_with(&transport);

    let mut stream = session
        .execute("SELECT n FROM six", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    assert_eq!(stream.titles(), vec!["n".to_string()]);
    assert_eq!(session.connection_state(), ConnectionState::Streaming);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.get::<i32>("n").unwrap(), 1);

    stream.done().await;
    assert!(transport.is_idle());
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(stream.next().await.unwrap().is_none());

    let result = session.query("SELECT n FROM two", ()).await.unwrap();
    assert_eq!(result.len(), 2);
}

#[tokio::test]
async fn test_new_query_drains_active_stream() {
    let transport = InMemoryTestTransport::new()
        .with_response(numbers(6))
        .with_response(numbers(3));
    let session = session_with(&transport);

    let mut stream = session
        .execute("SELECT n FROM six", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    stream.next().await.unwrap().unwrap();
    stream.next().await.unwrap().unwrap();

    // Without draining, the transport would refuse this command.
    let result = session.query("SELECT n FROM three", ()).await.unwrap();
    assert_eq!(result.len(), 3);
    assert!(transport.is_idle());
    assert!(!stream.has_more());

    assert!(stream.next().await.unwrap().is_none());
    assert!(!stream.has_more());
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_terminated_stream_discards_unread_first_row() {
    let transport = InMemoryTestTransport::new()
        .with_response(numbers(3))
        .with_response(numbers(1));
    let session = session_with(&transport);

    let mut stream = session
        .execute("SELECT n FROM three", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    assert!(stream.has_more());

    session.query("SELECT 1", ()).await.unwrap();
    assert!(!stream.has_more());
    assert!(stream.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dropped_stream_is_drained_by_next_operation() {
    let transport = InMemoryTestTransport::new()
        .with_response(numbers(4))
        .with_response(numbers(1));
    let session = session_with(&transport);

    drop(session.execute("SELECT n FROM four", ()).await.unwrap());
    assert!(!transport.is_idle());

    assert_eq!(session.query("SELECT 1", ()).await.unwrap().len(), 1);
    assert!(transport.is_idle());
}

#[tokio::test]
async fn test_bulk_mode_buffers_rows() {
    let transport = InMemoryTestTransport::new().with_response(numbers(3));
    let session = Session::with_transport(
        Box::new(transport.clone()),
        SessionConfig::default().single_row_mode(false),
    );

    let mut stream = session
        .execute("SELECT n FROM three", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(transport.is_idle());

    let mut seen = Vec::new();
    while let Some(row) = stream.next().await.unwrap() {
        seen.push(row.get::<i32>("n").unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_spawn_each_delivers_rows_in_order() {
    let transport = InMemoryTestTransport::new().with_response(numbers(5));
    let session = session_with(&transport);

    let stream = session
        .execute("SELECT n FROM five", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let count = stream
        .spawn_each(move |row| sink.lock().unwrap().push(row.get::<i32>("n").unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(count, 5);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_channel_delivery() {
    let transport = InMemoryTestTransport::new().with_response(numbers(3));
    let session = session_with(&transport);

    let mut rx = session
        .execute("SELECT n FROM three", ())
        .await
        .unwrap()
        .into_stream()
        .unwrap()
        .into_channel(1);

    let mut seen = Vec::new();
    while let Some(row) = rx.recv().await {
        seen.push(row.unwrap().get::<i32>("n").unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(transport.is_idle());
}

#[tokio::test]
async fn test_named_parameters_are_rejected_locally() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);

    let err = session
        .execute(
            "SELECT * FROM users WHERE id = :id",
            vec![("id".to_string(), SqlValue::from(1))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PgSessionError::Unsupported(_)));

    let statement = session.prepare("SELECT 1").await.unwrap();
    let err = session
        .execute_prepared(&statement, vec![("id".to_string(), SqlValue::from(1))])
        .await
        .unwrap_err();
    assert!(matches!(err, PgSessionError::Unsupported(_)));
    transport.assert_call_count(1);
}

#[tokio::test]
async fn test_encoding_failure_sends_nothing() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);

    let err = session
        .execute(
            "INSERT INTO t VALUES ($1, $2)",
            [SqlValue::from("ok"), SqlValue::RawText(vec![0xff])],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PgSessionError::DataConversion(_)));
    transport.assert_call_count(0);
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_commit_without_begin() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);

    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, PgSessionError::TransactionState(_)));
    assert!(!session.in_transaction());
    transport.assert_call_count(0);
}

#[tokio::test]
async fn test_transaction_verb_ordering() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);

    session.begin().await.unwrap();
    assert!(session.in_transaction());
    assert!(matches!(
        session.begin().await,
        Err(PgSessionError::TransactionState(_))
    ));

    session.savepoint("sp").await.unwrap();
    session.rollback_to_savepoint("sp").await.unwrap();
    session.release_savepoint("sp").await.unwrap();
    session.commit().await.unwrap();
    assert!(!session.in_transaction());
    assert!(matches!(
        session.commit().await,
        Err(PgSessionError::TransactionState(_))
    ));
    assert!(matches!(
        session.savepoint("sp").await,
        Err(PgSessionError::TransactionState(_))
    ));

    let sql: Vec<String> = transport
        .recorded_calls()
        .iter()
        .map(|c| c.sql().to_string())
        .collect();
    assert_eq!(
        sql,
        vec![
            "BEGIN",
            "SAVEPOINT \"sp\"",
            "ROLLBACK TO SAVEPOINT \"sp\"",
            "RELEASE SAVEPOINT \"sp\"",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_failed_commit_ends_transaction() {
    let transport = InMemoryTestTransport::new()
        .with_command_response(TestResponse::default())
        .with_command_response(
            InMemoryTestResponseBuilder::new()
                .error("ERROR:  could not serialize access")
                .build(),
        );
    let session = session_with(&transport);

    session.begin().await.unwrap();
    let err = session.commit().await.unwrap_err();
    match err {
        PgSessionError::Database { query, .. } => assert_eq!(query, "COMMIT"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!session.in_transaction());
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_prepare_execute_and_release() {
    let transport = InMemoryTestTransport::new().with_response(numbers(1));
    let session = session_with(&transport);

    let statement = session
        .prepare("SELECT n FROM t WHERE n = $1")
        .await
        .unwrap();
    assert!(transport.prepared_names().contains(statement.name()));

    let result = session
        .query_prepared(&statement, [SqlValue::from(1)])
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    transport.assert_last_query(statement.name(), &[RecordedParam::text("1")]);

    session.release(&statement).await.unwrap();
    transport.assert_call_count(2);
}

#[tokio::test]
async fn test_failed_prepare_surfaces_server_error() {
    let transport = InMemoryTestTransport::new().with_command_response(
        InMemoryTestResponseBuilder::new()
            .error("ERROR:  syntax error at or near \"SELEC\"")
            .build(),
    );
    let session = session_with(&transport);

    match session.prepare("SELEC 1").await.unwrap_err() {
        PgSessionError::Database { message, query } => {
            assert!(message.contains("syntax error"));
            assert_eq!(query, "SELEC 1");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_prepared_statement_survives_new_connection() {
    let first = InMemoryTestTransport::new();
    let session = session_with(&first);
    let statement = session.prepare("SELECT n FROM t").await.unwrap();

    let second = InMemoryTestTransport::new().with_responses([numbers(1), numbers(1)]);
    session
        .replace_transport(Box::new(second.clone()))
        .await
        .unwrap();

    session.query_prepared(&statement, ()).await.unwrap();
    let calls = second.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        RecordedCall::Prepare {
            name: statement.name().to_string(),
            sql: "SELECT n FROM t".to_string(),
        }
    );
    assert!(matches!(calls[1], RecordedCall::ExecutePrepared { .. }));

    session.query_prepared(&statement, ()).await.unwrap();
    assert_eq!(second.recorded_calls().len(), 3);
}

#[tokio::test]
async fn test_close_drains_and_disconnects() {
    let transport = InMemoryTestTransport::new().with_response(numbers(3));
    let session = session_with(&transport);

    let _stream = session.execute("SELECT n FROM three", ()).await.unwrap();
    session.close().await.unwrap();

    assert!(!session.is_connected());
    assert!(transport.is_idle());
    assert!(matches!(
        session.query("SELECT 1", ()).await,
        Err(PgSessionError::Connection(_))
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_lost_connection_is_a_connection_error() {
    let transport = InMemoryTestTransport::new();
    let session = session_with(&transport);
    transport.disconnect();

    match session.query("SELECT 1", ()).await.unwrap_err() {
        PgSessionError::Connection(message) => assert!(message.contains("closed")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}

/// Accepts every command but never produces a result.
struct SilentTransport;

#[async_trait]
impl Transport for SilentTransport {
    fn is_connected(&self) -> bool {
        true
    }

    fn error_message(&self) -> String {
        "lost synchronization with server".to_string()
    }

    async fn exec(&mut self, _sql: &str) -> Option<PgResult> {
        None
    }

    async fn send_query_params(&mut self, _sql: &str, _params: &[WireParam<'_>]) -> bool {
        true
    }

    async fn send_query_prepared(&mut self, _name: &str, _params: &[WireParam<'_>]) -> bool {
        true
    }

    async fn prepare(&mut self, _name: &str, _sql: &str) -> Option<PgResult> {
        None
    }

    fn set_single_row_mode(&mut self) -> bool {
        true
    }

    async fn get_result(&mut self) -> Option<PgResult> {
        None
    }

    async fn close(&mut self) {}
}

#[tokio::test]
async fn test_missing_result_is_reported() {
    let session = Session::with_transport(Box::new(SilentTransport), SessionConfig::default());

    match session.query("SELECT 1", ()).await.unwrap_err() {
        PgSessionError::NoResult(message) => assert!(message.contains("synchronization")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        session.begin().await,
        Err(PgSessionError::NoResult(_))
    ));
    assert!(!session.in_transaction());
    assert!(matches!(
        session.prepare("SELECT 1").await,
        Err(PgSessionError::NoResult(_))
    ));
    assert_eq!(session.connection_state(), ConnectionState::Idle);
}
