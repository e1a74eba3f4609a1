mod tokio_postgres;

pub use self::in_memory_test::{
    InMemoryTestResponseBuilder, InMemoryTestTransport, RecordedCall, RecordedParam, TestResponse,
};
pub use self::tokio_postgres::TokioPostgresTransport;
