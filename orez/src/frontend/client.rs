//! One client connection, startup to close.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::debug;

use crate::backend::manager::{Instances, POSTGRES};
use crate::backend::Instance;
use crate::config::config;
use crate::net::messages::{
    Authentication, BackendKeyData, CommandComplete, ErrorResponse, FromBytes, Message,
    ParameterStatus, Parse, ParseComplete, Password, Protocol, Query, ReadyForQuery, Startup,
    ToBytes,
};
use crate::net::{tweak, Stream};

use super::comms::{comms, Comms};
use super::replication::{self, stream as replication_stream};
use super::rewrite;
use super::Error;

/// Statements run on the shared engine session when the last client of a
/// database disconnects. Resetting earlier would clobber other clients
/// mid-transaction.
const SESSION_RESET: &[&str] = &[
    "ROLLBACK",
    "SET search_path TO public",
    "RESET statement_timeout",
    "RESET lock_timeout",
    "RESET idle_in_transaction_session_timeout",
];

pub struct Client {
    stream: Stream,
    id: u64,
    key: BackendKeyData,
    database: String,
    replication_mode: bool,
    instance: Arc<Instance>,
    comms: Comms,
}

impl Client {
    /// Run one accepted connection to completion.
    pub async fn spawn(stream: TcpStream, instances: Arc<Instances>) -> Result<(), Error> {
        tweak(&stream)?;
        let mut stream = Stream::plain(stream);

        let startup = loop {
            match Startup::from_stream(&mut stream).await? {
                // TLS is not offered; clients retry in the clear.
                Startup::Ssl => stream.refuse_tls().await?,
                startup @ Startup::Startup { .. } => break startup,
            }
        };

        let config = config();
        let user = startup.user().to_string();
        let database = startup.database().to_string();
        let replication_mode = startup.replication();

        stream.send_flush(&Authentication::CleartextPassword).await?;
        let password = Password::from_bytes(stream.read().await?.to_bytes()?)?;

        if user != config.user || password.password != config.password {
            debug!("authentication failed for user \"{}\"", user);
            stream
                .send(&ErrorResponse::auth("authentication failed"))
                .await?;
            stream.send_flush(&ReadyForQuery::idle()).await?;
            return Ok(());
        }

        stream.send(&Authentication::Ok).await?;
        for status in ParameterStatus::fake() {
            stream.send(&status).await?;
        }
        let key = BackendKeyData::new();
        stream.send(&key).await?;
        stream.send_flush(&ReadyForQuery::idle()).await?;

        let comms = comms();
        let id = comms.next_connection_id();

        // Replication connections always use the postgres instance,
        // whatever database they asked for.
        let instance = if replication_mode {
            instances.postgres()
        } else {
            instances.get(&database)
        };

        comms.connect(&database);
        debug!(
            "[{}] connected (database={}, instance={}, replication={}, backend_pid={})",
            id,
            database,
            instance.name(),
            replication_mode,
            key.pid
        );

        let mut client = Client {
            stream,
            id,
            key,
            database,
            replication_mode,
            instance,
            comms,
        };

        let result = client.ready_and_run().await;
        client.disconnect().await;

        match result {
            Err(err) if err.disconnect() => Ok(()),
            result => result,
        }
    }

    async fn ready_and_run(&mut self) -> Result<(), Error> {
        self.instance.wait_ready().await?;
        self.run().await
    }

    /// The message loop. One message in flight at a time.
    async fn run(&mut self) -> Result<(), Error> {
        loop {
            let message = self.stream.read().await?;

            if message.code() == 'X' {
                debug!("[{}] terminated", self.id);
                return Ok(());
            }

            if self.replication_mode {
                if self.replication_message(message).await? {
                    return Ok(());
                }
            } else {
                self.regular_message(message).await?;
            }
        }
    }

    /// Rewrite where needed, synthesize no-op responses, forward the rest.
    async fn regular_message(&mut self, message: Message) -> Result<(), Error> {
        let message = match message.code() {
            'Q' => {
                let query = Query::from_bytes(message.to_bytes()?)?;

                if rewrite::is_noop(&query.query) {
                    self.stream.send(&CommandComplete::new("SET")).await?;
                    self.stream
                        .send_flush(&ReadyForQuery::in_transaction())
                        .await?;
                    return Ok(());
                }

                Query::new(rewrite::rewrite(&query.query)).message()?
            }
            'P' => {
                let parse = Parse::from_bytes(message.to_bytes()?)?;

                if rewrite::is_noop(&parse.query) {
                    self.stream.send_flush(&ParseComplete).await?;
                    return Ok(());
                }

                Parse {
                    query: rewrite::rewrite(&parse.query),
                    ..parse
                }
                .message()?
            }
            _ => message,
        };

        self.forward(message).await
    }

    /// Replication connections only speak simple queries. Returns true when
    /// the connection is done (the streaming loop never yields back).
    async fn replication_message(&mut self, message: Message) -> Result<bool, Error> {
        if message.code() != 'Q' {
            return Ok(false);
        }

        let query = Query::from_bytes(message.to_bytes()?)?;
        let sql = query.query;

        if sql.trim().to_uppercase().starts_with("START_REPLICATION") {
            replication_stream::run(&mut self.stream, self.instance.clone(), self.id).await?;
            return Ok(true);
        }

        if let Some(messages) = replication::handle_command(&sql, &self.instance).await? {
            for message in &messages {
                self.stream.send(message).await?;
            }
            self.stream.flush().await?;
            return Ok(false);
        }

        self.forward(Query::new(rewrite::rewrite(&sql)).message()?)
            .await?;
        Ok(false)
    }

    /// Submit to the engine under the instance lock and forward whatever
    /// comes back. Engine failures answer the client and keep the
    /// connection open.
    async fn forward(&mut self, message: Message) -> Result<(), Error> {
        let code = message.code();

        match self.instance.exec_protocol_raw(message.to_bytes()?).await {
            Ok(response) => {
                let response = if code != 'Q' && code != 'S' {
                    rewrite::strip_ready_for_query(response)
                } else {
                    response
                };

                if !response.is_empty() {
                    self.stream.write_all_flush(&response).await?;
                }

                if self.instance.name() == POSTGRES {
                    self.comms.wake_replication();
                }

                Ok(())
            }
            Err(err) => {
                debug!("[{}] engine: {}", self.id, err);
                self.stream
                    .send(&ErrorResponse::engine(err.to_string()))
                    .await?;
                self.stream.send_flush(&ReadyForQuery::error()).await?;
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) {
        let remaining = self.comms.disconnect(&self.database);
        debug!(
            "[{}] disconnected (backend_pid={}), {} left on {}",
            self.id, self.key.pid, remaining, self.database
        );

        if remaining == 0 {
            self.instance.exec_session(SESSION_RESET).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::instance::test_support::RecordingEngine;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn instances(engine: &RecordingEngine) -> Arc<Instances> {
        Arc::new(Instances::for_tests(
            engine.instance(),
            engine.instance(),
            engine.instance(),
        ))
    }

    async fn serve(engine: &RecordingEngine) -> (Stream, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let instances = instances(engine);

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Client::spawn(stream, instances).await.unwrap();
        });

        let client = Stream::plain(TcpStream::connect(addr).await.unwrap());
        (client, server)
    }

    fn startup() -> Startup {
        Startup::Startup {
            params: vec![
                ("user".into(), "user".into()),
                ("database".into(), "postgres".into()),
            ],
        }
    }

    #[tokio::test]
    async fn tls_refused_then_full_handshake() {
        let engine = RecordingEngine::default();
        let (mut client, server) = serve(&engine).await;

        // TLS probe: exactly one 'N' byte back, same connection continues.
        client
            .write_all_flush(&Startup::Ssl.to_bytes().unwrap())
            .await
            .unwrap();
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"N");

        client
            .write_all_flush(&startup().to_bytes().unwrap())
            .await
            .unwrap();

        let auth = Authentication::from_bytes(client.read().await.unwrap().to_bytes().unwrap())
            .unwrap();
        assert_eq!(auth, Authentication::CleartextPassword);

        client.send_flush(&Password::new("password")).await.unwrap();

        let ok = Authentication::from_bytes(client.read().await.unwrap().to_bytes().unwrap())
            .unwrap();
        assert_eq!(ok, Authentication::Ok);

        // Fixed parameter set, then backend key, then ready.
        let mut statuses = vec![];
        loop {
            let message = client.read().await.unwrap();
            match message.code() {
                'S' => statuses.push(
                    ParameterStatus::from_bytes(message.to_bytes().unwrap()).unwrap(),
                ),
                'K' => break,
                code => panic!("unexpected message {}", code),
            }
        }
        assert_eq!(statuses.len(), 8);
        assert!(statuses
            .iter()
            .any(|s| s.name == "server_version" && s.value == "16.4"));

        let ready = client.read().await.unwrap();
        assert_eq!(ready.code(), 'Z');

        // No-op interception: SET SESSION never reaches the engine.
        client
            .send_flush(&Query::new(
                "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY",
            ))
            .await
            .unwrap();

        let complete =
            CommandComplete::from_bytes(client.read().await.unwrap().to_bytes().unwrap())
                .unwrap();
        assert_eq!(complete.command, "SET");
        let ready = ReadyForQuery::from_bytes(client.read().await.unwrap().to_bytes().unwrap())
            .unwrap();
        assert_eq!(ready.status, 'T');

        client.send_flush(&crate::net::messages::Terminate).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_gets_error_and_close() {
        let engine = RecordingEngine::default();
        let (mut client, server) = serve(&engine).await;

        client
            .write_all_flush(&startup().to_bytes().unwrap())
            .await
            .unwrap();
        client.read().await.unwrap(); // cleartext request
        client.send_flush(&Password::new("wrong")).await.unwrap();

        let error =
            ErrorResponse::from_bytes(client.read().await.unwrap().to_bytes().unwrap()).unwrap();
        assert_eq!(error.code, "08006");
        assert_eq!(error.message, "authentication failed");

        let ready = client.read().await.unwrap();
        assert_eq!(ready.code(), 'Z');

        // Server closes; the next read fails.
        assert!(client.read().await.is_err());
        server.await.unwrap();
    }
}
