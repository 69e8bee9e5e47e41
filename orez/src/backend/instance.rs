//! One embedded-engine instance and its exclusive lock.
//!
//! The engine holds a single session shared by every TCP client routed to
//! it, so all access is serialized through a FIFO-fair async mutex: acquire,
//! perform one call, release. Never hold the lock across client I/O.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use super::engine::{Engine, EngineError, Row};

pub struct Instance {
    name: String,
    engine: Box<dyn Engine>,
    lock: Mutex<()>,
}

impl Instance {
    pub fn new(name: impl ToString, engine: Box<dyn Engine>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            engine,
            lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn wait_ready(&self) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        self.engine.wait_ready().await
    }

    pub async fn exec(&self, sql: &str) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        self.engine.exec(sql).await
    }

    pub async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, EngineError> {
        let _guard = self.lock.lock().await;
        self.engine.query(sql, params).await
    }

    pub async fn exec_protocol_raw(&self, message: Bytes) -> Result<Bytes, EngineError> {
        let _guard = self.lock.lock().await;
        self.engine.exec_protocol_raw(message).await
    }

    /// Run a best-effort statement sequence under one lock hold. Used for
    /// the session reset when the last client of a database disconnects.
    pub async fn exec_session(&self, statements: &[&str]) {
        let _guard = self.lock.lock().await;

        for statement in statements {
            if let Err(err) = self.engine.exec(statement).await {
                debug!("[{}] session reset \"{}\": {}", self.name, statement, err);
            }
        }
    }

    pub async fn close(&self) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        self.engine.close().await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::super::engine::{Engine, EngineError, Row};
    use super::Instance;

    /// Engine fake recording statements and answering queries from a
    /// scripted queue. Cloning shares the recorder, so a test can keep a
    /// handle while the instance owns the boxed copy.
    #[derive(Default, Clone)]
    pub struct RecordingEngine {
        pub state: Arc<RecordingState>,
    }

    #[derive(Default)]
    pub struct RecordingState {
        pub statements: Mutex<Vec<String>>,
        pub queries: Mutex<Vec<String>>,
        pub responses: Mutex<Vec<Vec<Row>>>,
    }

    impl RecordingEngine {
        pub fn instance(&self) -> Arc<Instance> {
            Instance::new("test", Box::new(self.clone()))
        }

        pub fn push_response(&self, rows: Vec<Row>) {
            self.state.responses.lock().push(rows);
        }

        pub fn statements(&self) -> Vec<String> {
            self.state.statements.lock().clone()
        }

        pub fn queries(&self) -> Vec<String> {
            self.state.queries.lock().clone()
        }
    }

    #[async_trait]
    impl Engine for RecordingEngine {
        async fn wait_ready(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn exec(&self, sql: &str) -> Result<(), EngineError> {
            self.state.statements.lock().push(sql.to_string());
            Ok(())
        }

        async fn query(&self, sql: &str, _params: &[&str]) -> Result<Vec<Row>, EngineError> {
            self.state.queries.lock().push(sql.to_string());
            let mut responses = self.state.responses.lock();
            if responses.is_empty() {
                Ok(vec![])
            } else {
                Ok(responses.remove(0))
            }
        }

        async fn exec_protocol_raw(&self, _message: Bytes) -> Result<Bytes, EngineError> {
            Ok(Bytes::new())
        }

        async fn close(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_support::RecordingEngine;

    #[tokio::test]
    async fn session_reset_runs_in_order() {
        let engine = RecordingEngine::default();
        let instance = engine.instance();

        instance
            .exec_session(&["ROLLBACK", "SET search_path TO public"])
            .await;

        assert_eq!(
            engine.statements(),
            vec!["ROLLBACK".to_string(), "SET search_path TO public".to_string()]
        );
    }

    #[tokio::test]
    async fn calls_serialize_through_the_lock() {
        let engine = RecordingEngine::default();
        let instance = engine.instance();

        let a = instance.exec("select 1");
        let b = instance.exec("select 2");
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        assert_eq!(engine.statements().len(), 2);
    }
}
