use crate::error::{MigrateError, Result};
use crate::store::mongo::{MongoSource, MongoTarget};
use crate::store::StoreError;
use crate::{MigrateConf, ADMIN_DB_NAME};
use bson::doc;
use mongodb::sync::Client;

/// Source and target mongodb clients of one migration run.
///
/// Both clients are opened once and shared by every collection. Database handles
/// given out share the client, a client is closed once the connection and every
/// handle taken from it are dropped.
pub struct Connection<'a> {
    inner: ConnectionInner<'a>,
}

impl<'a> Connection<'a> {
    /// create a new connection from given `config`.
    pub fn new(config: &MigrateConf) -> Result<Connection> {
        let source_conn = open_client(config.get_src_uri())?;
        let target_conn = open_client(config.get_dst_uri())?;
        Ok(Connection {
            inner: ConnectionInner {
                source_conn,
                target_conn,
                config,
            },
        })
    }

    /// Check that both servers are reachable, clients connect lazily so nothing
    /// is sent over network before this.
    pub fn check_connectivity(&self) -> Result<()> {
        self.inner.check_connectivity()
    }

    /// get database to migrate from.
    pub fn get_src_db(&self) -> MongoSource {
        MongoSource::new(
            self.inner
                .source_conn
                .database(self.inner.config.get_src_db()),
        )
    }

    /// get database to migrate into.
    pub fn get_target_db(&self) -> MongoTarget {
        MongoTarget::new(
            self.inner
                .target_conn
                .database(self.inner.config.get_dst_db()),
        )
    }
}

fn open_client(uri: &str) -> Result<Client> {
    Client::with_uri_str(uri).map_err(|e| MigrateError::Connection {
        uri: uri.to_string(),
        detail: StoreError::wrap(e),
    })
}

struct ConnectionInner<'a> {
    source_conn: Client,
    target_conn: Client,
    config: &'a MigrateConf,
}

impl ConnectionInner<'_> {
    fn check_connectivity(&self) -> Result<()> {
        let ping = doc! {"ping": 1};
        let targets = [
            (&self.source_conn, self.config.get_src_uri()),
            (&self.target_conn, self.config.get_dst_uri()),
        ];
        for (client, uri) in targets.iter() {
            if let Err(e) = client
                .database(ADMIN_DB_NAME)
                .run_command(ping.clone(), None)
            {
                return Err(MigrateError::Connection {
                    uri: uri.to_string(),
                    detail: StoreError::wrap(e),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SourceDb, TargetDb};

    fn conf(src_uri: &str) -> MigrateConf {
        MigrateConf::new(
            src_uri.to_string(),
            "mongodb://localhost:27018".to_string(),
            "app".to_string(),
            "app_copy".to_string(),
        )
    }

    #[test]
    fn test_database_handles_outlive_connection() {
        // clients connect lazily, no server is needed to hand out handles.
        let conf = conf("mongodb://localhost:27017");
        let (source, target) = {
            let conn = Connection::new(&conf).unwrap();
            (conn.get_src_db(), conn.get_target_db())
        };
        assert_eq!(source.name(), "app");
        assert_eq!(target.name(), "app_copy");
    }

    #[test]
    fn test_invalid_uri() {
        let conf = conf("not-a-mongodb-uri");
        match Connection::new(&conf) {
            Err(MigrateError::Connection { uri, .. }) => assert_eq!(uri, "not-a-mongodb-uri"),
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("invalid uri accepted"),
        }
    }
}
